//! 字段模板解析工具模块
//! 负责把规则模板中的捕获组占位符替换为实际捕获内容
//!
//! 模板语法（封闭文法，与正则引擎自身的替换语法无关）：
//! - `$N`（N 为一位或多位数字且 N ≥ 1）：第 N 个捕获组的文本，未参与匹配时为空串
//! - `$$`：字面量 `$`
//! - 其余字符（包括不构成占位符的 `$`）原样保留

use regex::Captures;

/// 模板解析工具类
pub struct TemplateResolver;

impl TemplateResolver {
    /// 使用正则捕获结果解析模板
    pub fn resolve(template: &str, captures: &Captures) -> String {
        Self::resolve_with(template, |index| captures.get(index).map(|m| m.as_str()))
    }

    /// 使用任意分组查询函数解析模板
    ///
    /// # 参数
    /// - `template`: 规则模板
    /// - `group`: 按分组序号返回分组文本，`None` 表示分组不存在或未参与匹配
    pub fn resolve_with<'a, F>(template: &str, group: F) -> String
    where
        F: Fn(usize) -> Option<&'a str>,
    {
        // 无占位符时直接返回，避免逐字符扫描
        if !template.contains('$') {
            return template.to_string();
        }

        let mut output = String::with_capacity(template.len() + 16);
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c != '$' {
                output.push(c);
                continue;
            }

            match chars.peek() {
                Some(&(_, '$')) => {
                    chars.next();
                    output.push('$');
                }
                Some(&(start, d)) if d.is_ascii_digit() => {
                    let mut end = start;
                    while let Some(&(idx, digit)) = chars.peek() {
                        if !digit.is_ascii_digit() {
                            break;
                        }
                        end = idx + digit.len_utf8();
                        chars.next();
                    }
                    // 超长数字无法解析为序号时视为不存在的分组
                    match template[start..end].parse::<usize>() {
                        Ok(0) => output.push_str(&template[pos..end]),
                        Ok(index) => output.push_str(group(index).unwrap_or("")),
                        Err(_) => {}
                    }
                }
                _ => output.push('$'),
            }
        }

        output
    }

    /// 判断模板是否包含捕获组占位符
    pub fn has_placeholder(template: &str) -> bool {
        let bytes = template.as_bytes();
        bytes
            .windows(2)
            .any(|w| w[0] == b'$' && w[1].is_ascii_digit() && w[1] != b'0')
    }
}
