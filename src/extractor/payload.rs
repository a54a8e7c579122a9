//! 可检索文本构建器
//! 将Banner与（可选的）base64编码响应体拼接为匹配引擎使用的文本

use std::borrow::Cow;
use base64::{engine::general_purpose, Engine as _};
use crate::logging::debug;

/// Banner与响应体之间的分隔符
pub const RESPONSE_SEPARATOR: &str = "\n";

/// 响应体提取器
pub struct PayloadExtractor;

impl PayloadExtractor {
    /// 解码base64响应体，非UTF-8内容按替换字符处理
    /// 空内容或无法解码时返回 `None`
    pub fn decode_response(response: &[u8]) -> Option<String> {
        let trimmed = response.trim_ascii();
        if trimmed.is_empty() {
            return None;
        }

        match general_purpose::STANDARD.decode(trimmed) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                debug!("Ignoring undecodable response payload: {}", e);
                None
            }
        }
    }

    /// 构建可检索文本：无可用响应体时直接借用Banner
    pub fn searchable_text<'a>(banner: &'a str, response: Option<&[u8]>) -> Cow<'a, str> {
        match response.and_then(Self::decode_response) {
            Some(body) => {
                let mut text = String::with_capacity(banner.len() + RESPONSE_SEPARATOR.len() + body.len());
                text.push_str(banner);
                text.push_str(RESPONSE_SEPARATOR);
                text.push_str(&body);
                Cow::Owned(text)
            }
            None => Cow::Borrowed(banner),
        }
    }
}
