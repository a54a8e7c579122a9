//! rsbanner - 服务Banner指纹识别引擎
//!
//! 以正则规则库匹配网络Banner，提取产品/版本/系统等字段，并按置信度输出候选识别结果。
//! 规则可以直接构造、从 Nmap service-probes 风格的探测文件导入，或以 JSON/MessagePack 规则集交换。

// 导出全局错误类型
pub use self::error::{ImportParseError, PatternCompileError, RsbResult, RsbannerError, ValidationError};

// 导出配置模块
pub use self::config::{ConfigManager, CustomConfigBuilder, EngineConfig, ImportOptions};

// 导出规则模块核心接口
pub use self::rule::{
    ImportReport, ProbeFileLoader, Rule, RuleSet, RuleSetCodec, ServiceInfo, SimpleRule, builtin_rules,
};

// 导出提取模块核心接口
pub use self::extractor::PayloadExtractor;

// 导出工具模块核心接口
pub use self::utils::{CpeBuilder, ResultRanker, TemplateResolver};

// 导出编译模块核心接口
pub use self::compiler::{CompiledRule, Matcher, RuleCompiler, RuleDiagnostic, RuleIssue};

// 导出检测模块核心接口
pub use self::detector::{
    BannerAnalyzer, BannerDetector, CacheSweeper, EngineStats, LoadReport, ResultCache, RuleRegistry, RuleStats,
};

// 声明所有子模块
mod logging;
pub mod config;
pub mod error;
pub mod rule;
pub mod extractor;
pub mod utils;
pub mod compiler;
pub mod detector;
