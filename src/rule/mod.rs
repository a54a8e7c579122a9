//! 规则模块：负责规则的数据模型、探测文件导入、内置规则与规则集编解码
pub mod model;
pub mod loader;
pub mod builtin;
pub mod codec;

// 导出核心接口
pub use self::model::{Rule, RuleSet, ServiceInfo, SimpleRule};
pub use self::loader::{ImportReport, ProbeFileLoader, unescape_pattern};
pub use self::builtin::builtin_rules;
pub use self::codec::RuleSetCodec;
