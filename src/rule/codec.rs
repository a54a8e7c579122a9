//! 规则集编解码
//! 处理规则集的 JSON（人工编辑/交换）与 MessagePack（紧凑二进制快照）序列化

use rmp_serde::{Serializer, from_slice};
use serde::Serialize;
use crate::logging::debug;

use super::model::RuleSet;
use crate::error::RsbResult;

/// 规则集编解码器
pub struct RuleSetCodec;

impl RuleSetCodec {
    /// 序列化为 JSON 字符串
    pub fn to_json(rule_set: &RuleSet, pretty: bool) -> RsbResult<String> {
        let json = if pretty {
            serde_json::to_string_pretty(rule_set)?
        } else {
            serde_json::to_string(rule_set)?
        };
        Ok(json)
    }

    /// 从 JSON 解析规则集（缺失字段取默认值）
    pub fn from_json(json: &str) -> RsbResult<RuleSet> {
        let rule_set: RuleSet = serde_json::from_str(json)?;
        debug!("Rule set parsed from JSON, rules: {}", rule_set.rules.len());
        Ok(rule_set)
    }

    /// 序列化为 MessagePack 字节
    pub fn to_msgpack(rule_set: &RuleSet) -> RsbResult<Vec<u8>> {
        let mut data = Vec::new();
        // 使用结构体字段名编码，保证 serde(default) 在解码时生效
        rule_set.serialize(&mut Serializer::new(&mut data).with_struct_map())?;
        debug!("Rule set serialized to MessagePack, size: {} bytes", data.len());
        Ok(data)
    }

    /// 从 MessagePack 字节解析规则集
    pub fn from_msgpack(data: &[u8]) -> RsbResult<RuleSet> {
        let rule_set: RuleSet = from_slice(data)?;
        debug!("Rule set decoded from MessagePack, rules: {}", rule_set.rules.len());
        Ok(rule_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RsbannerError;
    use crate::rule::Rule;

    fn sample_set() -> RuleSet {
        RuleSet {
            version: "1.0".to_string(),
            description: "sample".to_string(),
            author: "tester".to_string(),
            rules: vec![
                Rule::new("ssh", r"SSH-([.\d]+)").with_id("ssh_1").with_version("$1"),
                Rule::new("redis", r"\+PONG").with_id("redis_1").with_confidence(95),
            ],
        }
    }

    #[test]
    fn test_json_and_msgpack_preserve_rules() {
        let set = sample_set();

        let json = RuleSetCodec::to_json(&set, true).unwrap();
        assert_eq!(RuleSetCodec::from_json(&json).unwrap(), set);

        let bytes = RuleSetCodec::to_msgpack(&set).unwrap();
        assert_eq!(RuleSetCodec::from_msgpack(&bytes).unwrap(), set);
    }

    #[test]
    fn test_from_json_accepts_minimal_rules() {
        let set = RuleSetCodec::from_json(r#"{"rules":[{"service":"ftp","pattern":"^220"}]}"#).unwrap();
        assert_eq!(set.rules.len(), 1);
        assert!(set.version.is_empty());
    }

    #[test]
    fn test_decode_errors_propagate() {
        assert!(matches!(RuleSetCodec::from_json("{not json"), Err(RsbannerError::Json(_))));
        assert!(matches!(
            RuleSetCodec::from_msgpack(&[0xc1]),
            Err(RsbannerError::MsgPackDecode(_))
        ));
    }
}
