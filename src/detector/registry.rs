//! 规则注册表：持有编译后的规则集，负责加载/增删/校验与统计
//! 所有修改都在写锁内完成，并在释放写锁前使结果缓存失效
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use crate::logging::{debug, info, warn};

use super::cache::ResultCache;
use crate::compiler::{CompiledRule, RuleCompiler, RuleDefaults, RuleDiagnostic, RuleIdGenerator, RuleIssue};
use crate::error::{PatternCompileError, RsbResult, RsbannerError, ValidationError};
use crate::rule::Rule;

/// 批量加载结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// 加载后的规则总数（含惰性规则）
    pub loaded: usize,
    /// 正则编译失败、保留但不参与匹配的规则数
    pub inert: usize,
    /// 结构非法被跳过的规则数
    pub skipped: usize,
    pub diagnostics: Vec<RuleDiagnostic>,
}

/// 规则统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total_rules: usize,
    pub active_rules: usize,
    pub inert_rules: usize,
    pub by_service: BTreeMap<String, usize>,
    pub by_author: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct RegistryState {
    rules: Vec<CompiledRule>,
    last_reload: Option<DateTime<Local>>,
}

/// 规则注册表
#[derive(Debug)]
pub struct RuleRegistry {
    state: RwLock<RegistryState>,
    cache: Arc<ResultCache>,
    ids: RuleIdGenerator,
    default_confidence: u8,
}

impl RuleRegistry {
    pub fn new(cache: Arc<ResultCache>, default_confidence: u8) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cache,
            ids: RuleIdGenerator::default(),
            default_confidence,
        }
    }

    fn defaults(&self) -> RuleDefaults<'_> {
        RuleDefaults {
            default_confidence: self.default_confidence,
            ids: &self.ids,
        }
    }

    /// 整体替换规则集
    /// 新规则集在锁外编译完成后一次性换入，缓存失效是写锁内的最后一步
    pub fn load(&self, rules: Vec<Rule>) -> LoadReport {
        let start = Instant::now();
        let (compiled, diagnostics) = RuleCompiler::compile_batch(rules, self.defaults());

        let report = LoadReport {
            loaded: compiled.len(),
            inert: diagnostics
                .iter()
                .filter(|d| matches!(d.issue, RuleIssue::Inert(_)))
                .count(),
            skipped: diagnostics
                .iter()
                .filter(|d| matches!(d.issue, RuleIssue::Invalid(_)))
                .count(),
            diagnostics,
        };

        {
            let mut state = self.state.write();
            state.rules = compiled;
            state.last_reload = Some(Local::now());
            self.cache.invalidate_all();
        }

        info!(
            "Rules loaded in {:?}: {} total, {} inert, {} skipped",
            start.elapsed(),
            report.loaded,
            report.inert,
            report.skipped
        );
        report
    }

    /// 追加单条规则，校验失败时注册表保持不变；返回最终的规则ID
    /// 未指定ID时在写锁内分配，保证不与现有规则重复
    pub fn add(&self, rule: Rule) -> RsbResult<String> {
        RuleCompiler::validate(&rule)?;

        let mut state = self.state.write();
        let taken: HashSet<String> = state.rules.iter().map(|r| r.rule.id.clone()).collect();
        if taken.contains(rule.id.as_str()) {
            return Err(RsbannerError::InvalidInput(format!("rule id `{}` already exists", rule.id)));
        }
        let compiled = RuleCompiler::compile_rule(rule, self.defaults(), &taken);
        let id = compiled.rule.id.clone();
        state.rules.push(compiled);
        self.cache.invalidate_all();
        drop(state);

        debug!("Rule {} added", id);
        Ok(id)
    }

    /// 按ID删除规则，返回是否存在
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let before = state.rules.len();
        state.rules.retain(|r| r.id() != id);
        let removed = state.rules.len() != before;
        if removed {
            self.cache.invalidate_all();
        }
        drop(state);

        if removed {
            debug!("Rule {} removed", id);
        } else {
            warn!("Rule {} not found, nothing removed", id);
        }
        removed
    }

    /// 校验规则（不修改注册表）
    pub fn validate(&self, rule: &Rule) -> Result<(), ValidationError> {
        RuleCompiler::validate(rule)
    }

    /// 在读锁内访问规则集，并提供此刻的缓存代数
    pub fn with_rules<R>(&self, f: impl FnOnce(&[CompiledRule], u64) -> R) -> R {
        let state = self.state.read();
        f(&state.rules, self.cache.generation())
    }

    /// 所有规则（含惰性规则）的副本，按加入顺序
    pub fn rules(&self) -> Vec<Rule> {
        self.state.read().rules.iter().map(|r| r.rule.clone()).collect()
    }

    pub fn rule_by_id(&self, id: &str) -> Option<Rule> {
        self.state
            .read()
            .rules
            .iter()
            .find(|r| r.id() == id)
            .map(|r| r.rule.clone())
    }

    /// 惰性规则及其编译错误
    pub fn inert_rules(&self) -> Vec<(String, PatternCompileError)> {
        self.state
            .read()
            .rules
            .iter()
            .filter_map(|r| r.compile_error.clone().map(|e| (r.rule.id.clone(), e)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().rules.is_empty()
    }

    pub fn last_reload(&self) -> Option<DateTime<Local>> {
        self.state.read().last_reload
    }

    /// 按服务/作者统计规则数量
    pub fn rule_stats(&self) -> RuleStats {
        let state = self.state.read();
        let mut stats = RuleStats {
            total_rules: state.rules.len(),
            ..Default::default()
        };

        for compiled in &state.rules {
            if compiled.is_active() {
                stats.active_rules += 1;
            } else {
                stats.inert_rules += 1;
            }
            *stats.by_service.entry(compiled.rule.service.clone()).or_insert(0) += 1;

            let author = if compiled.rule.author.is_empty() {
                "unknown".to_string()
            } else {
                compiled.rule.author.clone()
            };
            *stats.by_author.entry(author).or_insert(0) += 1;
        }

        stats
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ServiceInfo;
    use std::time::Duration;

    fn registry() -> (RuleRegistry, Arc<ResultCache>) {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 100));
        (RuleRegistry::new(cache.clone(), 80), cache)
    }

    fn cached_result() -> Vec<ServiceInfo> {
        vec![ServiceInfo {
            name: "x".to_string(),
            product: "x".to_string(),
            version: String::new(),
            info: String::new(),
            hostname: String::new(),
            os: String::new(),
            device_type: String::new(),
            cpe: String::new(),
            confidence: 80,
            rule_id: "x".to_string(),
            matched_text: "x".to_string(),
        }]
    }

    #[test]
    fn test_load_reports_and_invalidates_cache() {
        let (registry, cache) = registry();
        cache.put(7, cached_result(), cache.generation());
        let before = cache.generation();

        let report = registry.load(vec![
            Rule::new("ssh", "SSH-"),
            Rule::new("bad", "(SSH"),
            Rule::new("", "nothing"),
        ]);

        assert_eq!(report.loaded, 2);
        assert_eq!(report.inert, 1);
        assert_eq!(report.skipped, 1);
        assert!(cache.is_empty());
        assert!(cache.generation() > before);
        assert!(registry.last_reload().is_some());

        // 惰性规则仍然可以查询到
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.inert_rules().len(), 1);
    }

    #[test]
    fn test_add_is_atomic_on_failure() {
        let (registry, _) = registry();
        registry.load(vec![Rule::new("ssh", "SSH-").with_id("ssh")]);

        let err = registry.add(Rule::new("http", "(nginx")).unwrap_err();
        assert!(matches!(err, RsbannerError::Validation(ValidationError::InvalidPattern(_))));
        assert!(registry.add(Rule::new("ssh", "dup").with_id("ssh")).is_err());
        assert_eq!(registry.len(), 1);

        let id = registry.add(Rule::new("http", "nginx")).unwrap();
        assert_eq!(registry.rule_by_id(&id).unwrap().confidence, 80);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_invalidates_only_when_found() {
        let (registry, cache) = registry();
        registry.load(vec![Rule::new("ssh", "SSH-").with_id("ssh")]);
        let generation = cache.generation();

        assert!(!registry.remove("missing"));
        assert_eq!(cache.generation(), generation);

        assert!(registry.remove("ssh"));
        assert!(cache.generation() > generation);
        assert!(registry.is_empty());
        assert!(registry.rule_by_id("ssh").is_none());
    }

    #[test]
    fn test_rule_stats_by_service_and_author() {
        let (registry, _) = registry();
        let mut nmap = Rule::new("http", "nginx");
        nmap.author = "nmap".to_string();
        registry.load(vec![nmap, Rule::new("http", "apache"), Rule::new("ssh", "(broken")]);

        let stats = registry.rule_stats();
        assert_eq!(stats.total_rules, 3);
        assert_eq!(stats.active_rules, 2);
        assert_eq!(stats.inert_rules, 1);
        assert_eq!(stats.by_service.get("http"), Some(&2));
        assert_eq!(stats.by_author.get("nmap"), Some(&1));
        assert_eq!(stats.by_author.get("unknown"), Some(&2));
    }

    #[test]
    fn test_generated_ids_never_collide_with_existing_ones() {
        let (registry, _) = registry();
        let report = registry.load(vec![
            Rule::new("ssh", "SSH-").with_id("rule_1"),
            Rule::new("http", "nginx"),
        ]);
        assert!(report.diagnostics.is_empty());

        let ids: Vec<String> = registry.rules().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["rule_1".to_string(), "rule_2".to_string()]);

        // 计数器的下一个值已被占用时，追加的规则仍能拿到新ID
        registry.load(vec![
            Rule::new("ssh", "SSH-").with_id("rule_3"),
            Rule::new("ftp", "^220").with_id("rule_4"),
        ]);
        let id = registry.add(Rule::new("http", "nginx")).unwrap();
        assert_eq!(id, "rule_5");
        assert_eq!(registry.len(), 3);

        assert!(registry.remove("rule_3"));
        assert_eq!(registry.len(), 2);
    }
}
