//! 全局配置管理,存储所有可配置项

use std::time::Duration;

/// 探测文件导入选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// match 行的置信度
    pub hard_match_confidence: u8,
    /// softmatch 相对 match 的扣减值
    pub softmatch_penalty: u8,
    /// softmatch 置信度下限
    pub softmatch_floor: u8,
}

impl ImportOptions {
    /// softmatch 规则的最终置信度：扣减后不低于下限，且不超过100
    pub fn softmatch_confidence(&self) -> u8 {
        self.hard_match_confidence
            .saturating_sub(self.softmatch_penalty)
            .max(self.softmatch_floor)
            .min(100)
    }

    /// match 规则的最终置信度
    pub fn hard_confidence(&self) -> u8 {
        self.hard_match_confidence.min(100)
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            hard_match_confidence: 85,
            softmatch_penalty: 20,
            softmatch_floor: 50,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // 是否启用结果缓存
    pub cache_enabled: bool,
    // 缓存条目上限
    pub cache_size: usize,
    // 缓存条目存活时间
    pub cache_ttl: Duration,
    // 后台清理周期
    pub sweep_interval: Duration,
    // 批量匹配的最大并发数
    pub max_concurrency: usize,
    // 规则未设置置信度时的默认值
    pub default_confidence: u8,
    // 规则未提供CPE模板时是否根据产品/版本合成CPE
    pub synthesize_cpe: bool,
    // 探测文件导入选项
    pub import: ImportOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            max_concurrency: 50,
            default_confidence: 80,
            synthesize_cpe: true,
            import: ImportOptions::default(),
        }
    }
}

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取默认配置
    pub fn get_default() -> EngineConfig {
        EngineConfig::default()
    }

    /// 自定义配置
    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }
}

/// 配置构建器（便于自定义配置）
#[derive(Debug, Clone, Default)]
pub struct CustomConfigBuilder {
    config: EngineConfig,
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.cache_size = size;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max.max(1);
        self
    }

    pub fn default_confidence(mut self, confidence: u8) -> Self {
        self.config.default_confidence = confidence.min(100);
        self
    }

    pub fn synthesize_cpe(mut self, enabled: bool) -> Self {
        self.config.synthesize_cpe = enabled;
        self
    }

    pub fn import_options(mut self, options: ImportOptions) -> Self {
        self.config.import = options;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
