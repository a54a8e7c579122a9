//! 规则数据模型定义
//! 仅存储规则数据，无任何业务逻辑，支持序列化/反序列化

use std::fmt;
use serde::{Deserialize, Serialize};

/// Banner识别结果（单个候选）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub product: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpe: String,
    pub confidence: u8,
    pub rule_id: String,
    pub matched_text: String,
}

// ======== 为 ServiceInfo 实现 Display trait（用于 CLI / Report 输出） ========
impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.product)?;
        if !self.version.is_empty() {
            write!(f, " {}", self.version)?;
        }
        write!(f, " [{}%]", self.confidence)
    }
}

/// 匹配规则定义
/// 模板字段可包含 `$1`、`$2` 等捕获组占位符，空字符串表示该规则不提供此字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub id: String,
    pub service: String,
    pub pattern: String,
    pub product: String,
    pub version: String,
    pub info: String,
    pub hostname: String,
    pub os: String,
    pub device_type: String,
    pub cpe: String,
    /// 0 表示未设置，加载时使用引擎默认值
    pub confidence: u8,
    pub description: String,
    pub author: String,
    pub create_time: String,
}

impl Rule {
    /// 以服务名和正则快速创建规则，其余字段为空
    pub fn new(service: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    pub fn with_cpe(mut self, cpe: impl Into<String>) -> Self {
        self.cpe = cpe.into();
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence;
        self
    }
}

/// 简化的规则格式（用户友好），缺少ID/作者/创建时间，加入时自动补全
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleRule {
    pub service: String,
    pub pattern: String,
    pub product: String,
    pub version: String,
    pub description: String,
    pub confidence: u8,
}

// ======== 类型转换 ========
impl From<SimpleRule> for Rule {
    fn from(simple: SimpleRule) -> Self {
        Self {
            service: simple.service,
            pattern: simple.pattern,
            product: simple.product,
            version: simple.version,
            description: simple.description,
            confidence: simple.confidence,
            author: "user".to_string(),
            ..Default::default()
        }
    }
}

/// 规则集（导入/导出封装）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub version: String,
    pub description: String,
    pub author: String,
    pub rules: Vec<Rule>,
}
