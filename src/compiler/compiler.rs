//! 规则编译器核心
//! 负责规则校验、默认值补全，以及将规则正则编译为可执行的匹配器

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use regex::RegexBuilder;
use serde::Serialize;
use crate::logging::{debug, trace, warn};

use super::pattern::{CompiledRule, Matcher};
use crate::error::{PatternCompileError, ValidationError};
use crate::rule::Rule;
use crate::utils::TemplateResolver;

/// 单条正则编译后的内存上限，超限视为编译失败
const REGEX_SIZE_LIMIT: usize = 1 << 22;

/// 规则ID生成器（单实例内单调递增，批次之间不会重复）
#[derive(Debug)]
pub struct RuleIdGenerator {
    prefix: &'static str,
    next: AtomicU64,
}

impl RuleIdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", self.prefix, n)
    }

    /// 生成不在 `taken` 中的ID，跳过调用方已显式使用的编号
    pub fn next_unused(&self, taken: &HashSet<String>) -> String {
        loop {
            let id = self.next_id();
            if !taken.contains(&id) {
                return id;
            }
        }
    }
}

impl Default for RuleIdGenerator {
    fn default() -> Self {
        Self::new("rule")
    }
}

/// 编译时使用的默认值
#[derive(Debug, Clone, Copy)]
pub struct RuleDefaults<'a> {
    pub default_confidence: u8,
    pub ids: &'a RuleIdGenerator,
}

/// 单条规则的问题类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RuleIssue {
    /// 结构校验失败，规则被跳过
    Invalid(ValidationError),
    /// 正则编译失败，规则保留但不参与匹配
    Inert(PatternCompileError),
}

/// 单条规则诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDiagnostic {
    pub rule_id: String,
    pub issue: RuleIssue,
}

/// 规则编译器
pub struct RuleCompiler;

impl RuleCompiler {
    /// 编译单个正则模式（纯函数，无副作用）
    pub fn compile_pattern(pattern: &str) -> Result<Matcher, PatternCompileError> {
        RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map(Matcher::new)
            .map_err(|e| PatternCompileError {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// 结构校验（不含正则编译）
    pub fn validate_structure(rule: &Rule) -> Result<(), ValidationError> {
        if rule.service.trim().is_empty() {
            return Err(ValidationError::EmptyService);
        }
        if rule.pattern.is_empty() {
            return Err(ValidationError::EmptyPattern);
        }
        if rule.confidence > 100 {
            return Err(ValidationError::ConfidenceOutOfRange(rule.confidence));
        }
        Ok(())
    }

    /// 完整校验：服务名/正则非空、正则可编译、置信度在0-100之间
    pub fn validate(rule: &Rule) -> Result<(), ValidationError> {
        Self::validate_structure(rule)?;
        Self::compile_pattern(&rule.pattern)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidPattern(e.message))
    }

    /// 补全默认值：置信度、ID、创建时间
    /// 生成的ID不会与 `taken` 中已有的ID重复
    pub fn apply_defaults(rule: &mut Rule, defaults: RuleDefaults<'_>, taken: &HashSet<String>) {
        if rule.confidence == 0 {
            rule.confidence = defaults.default_confidence;
        }
        if rule.id.trim().is_empty() {
            rule.id = defaults.ids.next_unused(taken);
        }
        if rule.create_time.is_empty() {
            rule.create_time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }

    /// 编译单条规则（编译失败时返回惰性规则，不中断调用方）
    pub fn compile_rule(mut rule: Rule, defaults: RuleDefaults<'_>, taken: &HashSet<String>) -> CompiledRule {
        Self::apply_defaults(&mut rule, defaults, taken);

        match Self::compile_pattern(&rule.pattern) {
            Ok(matcher) => {
                Self::check_placeholders(&rule, &matcher);
                CompiledRule {
                    rule,
                    matcher: Some(matcher),
                    compile_error: None,
                }
            }
            Err(e) => {
                warn!("Rule {} is inert, pattern compile failed: {}", rule.id, e.message);
                CompiledRule {
                    rule,
                    matcher: None,
                    compile_error: Some(e),
                }
            }
        }
    }

    /// 编译规则批次
    /// 结构非法的规则被跳过，编译失败的规则保留为惰性规则，二者都记入诊断；
    /// 自动分配的ID避开批次内显式给出的ID
    pub fn compile_batch(
        rules: Vec<Rule>,
        defaults: RuleDefaults<'_>,
    ) -> (Vec<CompiledRule>, Vec<RuleDiagnostic>) {
        let start = Instant::now();
        let total = rules.len();
        let mut compiled = Vec::with_capacity(total);
        let mut diagnostics = Vec::new();
        let mut taken: HashSet<String> = rules
            .iter()
            .filter(|r| !r.id.trim().is_empty())
            .map(|r| r.id.clone())
            .collect();

        for rule in rules {
            if let Err(e) = Self::validate_structure(&rule) {
                warn!("Rule {:?} skipped: {}", rule.id, e);
                diagnostics.push(RuleDiagnostic {
                    rule_id: rule.id.clone(),
                    issue: RuleIssue::Invalid(e),
                });
                continue;
            }

            let compiled_rule = Self::compile_rule(rule, defaults, &taken);
            taken.insert(compiled_rule.rule.id.clone());
            if let Some(e) = &compiled_rule.compile_error {
                diagnostics.push(RuleDiagnostic {
                    rule_id: compiled_rule.rule.id.clone(),
                    issue: RuleIssue::Inert(e.clone()),
                });
            }
            compiled.push(compiled_rule);
        }

        debug!(
            "Compiled {} rules in {:?}: {} kept, {} diagnostics",
            total,
            start.elapsed(),
            compiled.len(),
            diagnostics.len()
        );

        (compiled, diagnostics)
    }

    /// 模板引用了捕获组但正则没有分组时给出提示
    fn check_placeholders(rule: &Rule, matcher: &Matcher) {
        let templates = [
            &rule.product,
            &rule.version,
            &rule.info,
            &rule.hostname,
            &rule.os,
            &rule.device_type,
            &rule.cpe,
        ];
        if matcher.captures_len() <= 1
            && templates.iter().any(|t| TemplateResolver::has_placeholder(t))
        {
            trace!("Rule {} references capture groups but its pattern has none", rule.id);
        }
    }
}
