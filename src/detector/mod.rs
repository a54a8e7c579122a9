//! 检测模块：Banner识别核心逻辑
pub mod analyzer;
pub mod cache;
pub mod registry;
pub mod detector;

// 导出核心接口
pub use self::analyzer::{Analysis, BannerAnalyzer};
pub use self::cache::{CacheKey, CacheSweeper, ResultCache};
pub use self::registry::{LoadReport, RuleRegistry, RuleStats};
pub use self::detector::{BannerDetector, EngineStats};
