//! CPE 标识合成工具
//! 规则未提供CPE模板时，根据解析后的产品与版本生成 `cpe:/a:<vendor>:<product>:<version>`

/// CPE 合成工具类
pub struct CpeBuilder;

impl CpeBuilder {
    /// 根据产品/版本合成CPE，产品为空时返回空串
    ///
    /// 厂商未知时使用 `*`，版本为空时同样使用 `*`
    pub fn synthesize(product: &str, version: &str) -> String {
        let product = Self::normalize(product);
        if product.is_empty() {
            return String::new();
        }

        let version = Self::normalize(version);
        let version = if version.is_empty() { "*".to_string() } else { version };

        format!("cpe:/a:*:{}:{}", product, version)
    }

    /// 转小写、空白转下划线、去除 `:` 以免破坏字段结构
    fn normalize(value: &str) -> String {
        value
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .map(|c| if c.is_whitespace() { '_' } else { c.to_ascii_lowercase() })
            .collect()
    }
}
