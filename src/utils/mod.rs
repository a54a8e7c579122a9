//! 工具模块：模板解析、结果排序、CPE合成
pub mod template;
pub mod ranking;
pub mod cpe;

pub use self::template::TemplateResolver;
pub use self::ranking::ResultRanker;
pub use self::cpe::CpeBuilder;
