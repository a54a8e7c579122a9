//! 全局错误类型定义
//! 单条规则/单行导入的问题以诊断值返回，只有整体性失败（读取失败、编解码失败）才以错误向上传播

use std::io::Error as IoError;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RsbannerError {
    // 规则相关错误
    #[error("Rule validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Pattern compile failed: {0}")]
    PatternCompile(#[from] PatternCompileError),

    // 序列化/反序列化错误
    #[error("JSON parse failed: {0}")]
    Json(#[from] SerdeJsonError),
    #[error("MessagePack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    // 基础错误
    #[error("IO failed: {0}")]
    Io(#[from] IoError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Async task failed: {0}")]
    AsyncTaskError(String),
}

// 全局Result类型
pub type RsbResult<T> = Result<T, RsbannerError>;

/// 规则结构校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    #[error("service must not be empty")]
    EmptyService,
    #[error("pattern must not be empty")]
    EmptyPattern,
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("confidence {0} is outside 0-100")]
    ConfidenceOutOfRange(u8),
}

/// 正则编译失败（规则保留但不参与匹配）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("cannot compile `{pattern}`: {message}")]
pub struct PatternCompileError {
    pub pattern: String,
    pub message: String,
}

/// 探测文件单行解析失败（该行被跳过）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("line {line_no}: {reason}")]
pub struct ImportParseError {
    /// 行号（从1开始）
    pub line_no: usize,
    /// 原始行内容
    pub line: String,
    pub reason: String,
}
