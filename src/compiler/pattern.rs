//! 编译后模式模型
//! 正则编译后的结构

use regex::{Captures, Regex};

use crate::error::PatternCompileError;
use crate::rule::Rule;

/// 运行时匹配器（非序列化）
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    pub(crate) fn new(regex: Regex) -> Self {
        Self { regex }
    }

    /// 首次匹配并返回捕获结果
    #[inline]
    pub fn captures<'a>(&self, input: &'a str) -> Option<Captures<'a>> {
        self.regex.captures(input)
    }

    /// 简单匹配判断
    #[inline]
    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// 捕获组数量（含整体匹配的第0组）
    pub fn captures_len(&self) -> usize {
        self.regex.captures_len()
    }

    /// 规则描述
    pub fn describe(&self) -> &str {
        self.regex.as_str()
    }
}

/// 编译后的规则
/// `matcher` 为 `None` 表示正则编译失败：规则保留在列表中，但不参与匹配
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub matcher: Option<Matcher>,
    pub compile_error: Option<PatternCompileError>,
}

impl CompiledRule {
    /// 是否属于活动规则集（可参与匹配）
    #[inline]
    pub fn is_active(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }
}
