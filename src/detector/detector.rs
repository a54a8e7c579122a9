//! 检测器核心：整合规则注册表、分析器与结果缓存，对外提供识别接口
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::Semaphore;
use crate::logging::{debug, info};

use super::analyzer::BannerAnalyzer;
use super::cache::{CacheSweeper, ResultCache};
use super::registry::{LoadReport, RuleRegistry, RuleStats};
use crate::config::{ConfigManager, EngineConfig};
use crate::error::{RsbResult, RsbannerError, ValidationError};
use crate::extractor::PayloadExtractor;
use crate::rule::{
    ImportReport, ProbeFileLoader, Rule, RuleSet, RuleSetCodec, ServiceInfo, SimpleRule, builtin_rules,
};

/// 引擎运行统计快照
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_rules: usize,
    pub inert_rules: usize,
    pub total_matches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub cached_entries: usize,
    pub rule_evaluations: u64,
    pub avg_match_time: Duration,
    pub last_reload_time: Option<DateTime<Local>>,
}

#[derive(Debug, Default)]
struct Counters {
    total_matches: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rule_evaluations: AtomicU64,
    match_time_nanos: AtomicU64,
}

/// Banner识别检测器
#[derive(Debug)]
pub struct BannerDetector {
    config: EngineConfig,
    registry: RuleRegistry,
    cache: Arc<ResultCache>,
    counters: Counters,
}

impl Default for BannerDetector {
    fn default() -> Self {
        Self::new(ConfigManager::get_default())
    }
}

impl BannerDetector {
    /// 创建检测器（空规则集）
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache_ttl, config.cache_size));
        let registry = RuleRegistry::new(cache.clone(), config.default_confidence);
        Self {
            config,
            registry,
            cache,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ======== 规则管理 ========

    /// 整体替换规则集
    pub fn load_rules(&self, rules: Vec<Rule>) -> LoadReport {
        self.registry.load(rules)
    }

    /// 加载内置规则（替换当前规则集）
    pub fn load_builtin_rules(&self) -> LoadReport {
        self.registry.load(builtin_rules())
    }

    /// 解析探测文件并以其规则替换当前规则集
    pub fn load_probe_file<R: BufRead>(&self, reader: R) -> RsbResult<(ImportReport, LoadReport)> {
        let import = ProbeFileLoader::new(self.config.import).parse(reader)?;
        let load = self.registry.load(import.rules.clone());
        Ok((import, load))
    }

    pub fn add_rule(&self, rule: Rule) -> RsbResult<String> {
        self.registry.add(rule)
    }

    /// 以简化格式追加规则
    pub fn add_simple_rule(&self, rule: SimpleRule) -> RsbResult<String> {
        self.registry.add(Rule::from(rule))
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    pub fn validate_rule(&self, rule: &Rule) -> Result<(), ValidationError> {
        self.registry.validate(rule)
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.registry.rules()
    }

    pub fn rule_by_id(&self, id: &str) -> Option<Rule> {
        self.registry.rule_by_id(id)
    }

    pub fn rule_stats(&self) -> RuleStats {
        self.registry.rule_stats()
    }

    // ======== 规则集导入导出 ========

    /// 导出当前规则集
    pub fn export_rules(&self, description: &str) -> RuleSet {
        RuleSet {
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.to_string(),
            author: "rsbanner".to_string(),
            rules: self.registry.rules(),
        }
    }

    /// 以规则集替换当前规则
    pub fn import_rule_set(&self, rule_set: RuleSet) -> LoadReport {
        info!(
            "Importing rule set {:?} ({} rules)",
            rule_set.description,
            rule_set.rules.len()
        );
        self.registry.load(rule_set.rules)
    }

    pub fn export_json(&self, pretty: bool) -> RsbResult<String> {
        RuleSetCodec::to_json(&self.export_rules("exported rules"), pretty)
    }

    pub fn import_json(&self, json: &str) -> RsbResult<LoadReport> {
        Ok(self.import_rule_set(RuleSetCodec::from_json(json)?))
    }

    pub fn export_msgpack(&self) -> RsbResult<Vec<u8>> {
        RuleSetCodec::to_msgpack(&self.export_rules("exported rules"))
    }

    pub fn import_msgpack(&self, data: &[u8]) -> RsbResult<LoadReport> {
        Ok(self.import_rule_set(RuleSetCodec::from_msgpack(data)?))
    }

    // ======== 匹配接口 ========

    /// 匹配Banner，返回按置信度降序排列的候选结果
    pub fn match_banner(&self, banner: &str) -> Vec<ServiceInfo> {
        self.match_text(banner)
    }

    /// 匹配Banner及其base64编码的响应体
    /// Banner为空时与 `match_banner("")` 一致，直接返回空结果，不解码响应体
    pub fn match_with_response(&self, banner: &str, response: Option<&[u8]>) -> Vec<ServiceInfo> {
        if banner.is_empty() {
            return self.match_text(banner);
        }
        let text = PayloadExtractor::searchable_text(banner, response);
        self.match_text(&text)
    }

    /// 最佳匹配（置信度最高的结果）
    pub fn best_match(&self, banner: &str) -> Option<ServiceInfo> {
        self.match_banner(banner).into_iter().next()
    }

    /// 并发批量匹配，输出顺序与输入一致
    pub async fn match_batch(self: &Arc<Self>, banners: Vec<String>) -> RsbResult<Vec<Vec<ServiceInfo>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(banners.len());

        for banner in banners {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| RsbannerError::AsyncTaskError(e.to_string()))?;
            let detector = Arc::clone(self);
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                detector.match_banner(&banner)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .map_err(|e| RsbannerError::AsyncTaskError(e.to_string()))?,
            );
        }
        Ok(results)
    }

    fn match_text(&self, text: &str) -> Vec<ServiceInfo> {
        let start = Instant::now();
        let results = self.evaluate(text);
        self.counters.total_matches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .match_time_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        results
    }

    fn evaluate(&self, text: &str) -> Vec<ServiceInfo> {
        if text.is_empty() {
            return Vec::new();
        }

        let key = self.config.cache_enabled.then(|| ResultCache::fingerprint(text));
        if let Some(key) = key {
            if let Some(cached) = self.cache.get(key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for banner fingerprint {:032x}", key);
                return cached;
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let (analysis, generation) = self.registry.with_rules(|rules, generation| {
            (BannerAnalyzer::analyze(rules, text, self.config.synthesize_cpe), generation)
        });
        self.counters
            .rule_evaluations
            .fetch_add(analysis.evaluations, Ordering::Relaxed);

        if let Some(key) = key {
            self.cache.put(key, analysis.results.clone(), generation);
        }
        analysis.results
    }

    // ======== 缓存与统计 ========

    pub fn clear_cache(&self) {
        self.registry.clear_cache();
    }

    /// 启动后台缓存清理任务（需在 tokio 运行时内调用）
    pub fn spawn_cache_sweeper(&self) -> RsbResult<CacheSweeper> {
        CacheSweeper::spawn(&self.cache, self.config.sweep_interval)
    }

    pub fn stats(&self) -> EngineStats {
        let total_matches = self.counters.total_matches.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;
        let match_nanos = self.counters.match_time_nanos.load(Ordering::Relaxed);
        let rule_stats = self.registry.rule_stats();

        EngineStats {
            total_rules: rule_stats.total_rules,
            inert_rules: rule_stats.inert_rules,
            total_matches,
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups == 0 { 0.0 } else { cache_hits as f64 / lookups as f64 },
            cached_entries: self.cache.len(),
            rule_evaluations: self.counters.rule_evaluations.load(Ordering::Relaxed),
            avg_match_time: match_nanos
                .checked_div(total_matches)
                .map(Duration::from_nanos)
                .unwrap_or_default(),
            last_reload_time: self.registry.last_reload(),
        }
    }
}
