//! 提取模块：构建匹配引擎使用的可检索文本
pub mod payload;

pub use self::payload::{PayloadExtractor, RESPONSE_SEPARATOR};
