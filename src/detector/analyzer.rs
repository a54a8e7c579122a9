//! Banner分析器：对活动规则逐条执行首次匹配，解析模板并输出候选结果
use regex::Captures;
use crate::logging::{debug, trace};

use crate::compiler::CompiledRule;
use crate::rule::{Rule, ServiceInfo};
use crate::utils::{CpeBuilder, ResultRanker, TemplateResolver};

/// 单次分析的输出
#[derive(Debug, Default)]
pub struct Analysis {
    /// 已按置信度降序排列的候选结果
    pub results: Vec<ServiceInfo>,
    /// 本次实际执行匹配的规则数量
    pub evaluations: u64,
}

/// Banner分析器
pub struct BannerAnalyzer;

impl BannerAnalyzer {
    /// 对可检索文本执行全部活动规则
    ///
    /// # 参数
    /// - `rules`: 编译后的规则（惰性规则自动跳过）
    /// - `text`: 可检索文本（Banner，可能附加了响应体）
    /// - `synthesize_cpe`: 规则未提供CPE模板时是否按产品/版本合成
    pub fn analyze(rules: &[CompiledRule], text: &str, synthesize_cpe: bool) -> Analysis {
        let mut analysis = Analysis::default();
        if text.is_empty() {
            return analysis;
        }

        for compiled in rules {
            let Some(matcher) = &compiled.matcher else {
                continue;
            };
            analysis.evaluations += 1;

            let Some(captures) = matcher.captures(text) else {
                continue;
            };

            let info = Self::build_service_info(&compiled.rule, &captures, synthesize_cpe);
            debug!(
                "Banner matched: rule={}, service={}, version={:?}, pattern={}",
                info.rule_id,
                info.name,
                info.version,
                matcher.describe()
            );
            analysis.results.push(info);
        }

        ResultRanker::rank(&mut analysis.results);
        trace!(
            "Analysis finished: {} rules evaluated, {} matches",
            analysis.evaluations,
            analysis.results.len()
        );
        analysis
    }

    /// 根据捕获结果构建识别结果
    fn build_service_info(rule: &Rule, captures: &Captures, synthesize_cpe: bool) -> ServiceInfo {
        let resolve = |template: &str| {
            if template.is_empty() {
                String::new()
            } else {
                TemplateResolver::resolve(template, captures)
            }
        };

        let resolved_product = resolve(&rule.product);
        let version = resolve(&rule.version);

        let mut cpe = resolve(&rule.cpe);
        if cpe.is_empty() && synthesize_cpe {
            cpe = CpeBuilder::synthesize(&resolved_product, &version);
        }

        let product = if resolved_product.is_empty() {
            rule.service.clone()
        } else {
            resolved_product
        };

        ServiceInfo {
            name: rule.service.clone(),
            product,
            version,
            info: resolve(&rule.info),
            hostname: resolve(&rule.hostname),
            os: resolve(&rule.os),
            device_type: resolve(&rule.device_type),
            cpe,
            confidence: rule.confidence,
            rule_id: rule.id.clone(),
            matched_text: captures
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{RuleCompiler, RuleDefaults, RuleIdGenerator};

    fn compile(rules: Vec<Rule>) -> Vec<CompiledRule> {
        let ids = RuleIdGenerator::default();
        let defaults = RuleDefaults { default_confidence: 80, ids: &ids };
        RuleCompiler::compile_batch(rules, defaults).0
    }

    #[test]
    fn test_analyze_empty_text_evaluates_nothing() {
        let rules = compile(vec![Rule::new("any", ".*")]);
        let analysis = BannerAnalyzer::analyze(&rules, "", true);
        assert!(analysis.results.is_empty());
        assert_eq!(analysis.evaluations, 0);
    }

    #[test]
    fn test_analyze_resolves_templates() {
        let rules = compile(vec![
            Rule::new("ssh", r"SSH-([.\d]+)-OpenSSH[_\s]+(\S+)")
                .with_id("openssh")
                .with_product("OpenSSH")
                .with_version("$2")
                .with_info("protocol $1")
                .with_confidence(95),
        ]);
        let analysis = BannerAnalyzer::analyze(&rules, "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5", false);

        assert_eq!(analysis.results.len(), 1);
        let info = &analysis.results[0];
        assert_eq!(info.version, "8.2p1");
        assert_eq!(info.info, "protocol 2.0");
        assert_eq!(info.matched_text, "SSH-2.0-OpenSSH_8.2p1");
        assert!(info.cpe.is_empty());
    }

    #[test]
    fn test_analyze_product_defaults_to_service() {
        let rules = compile(vec![Rule::new("redis", r"\+PONG")]);
        let analysis = BannerAnalyzer::analyze(&rules, "+PONG\r\n", true);

        let info = &analysis.results[0];
        assert_eq!(info.product, "redis");
        assert_eq!(info.confidence, 80);
        // 未提供产品模板时不合成CPE
        assert!(info.cpe.is_empty());
    }

    #[test]
    fn test_analyze_cpe_template_and_synthesis() {
        let rules = compile(vec![
            Rule::new("http", r"nginx/([\d.]+)")
                .with_product("nginx")
                .with_version("$1")
                .with_cpe("cpe:/a:igor_sysoev:nginx:$1"),
            Rule::new("http", r"nginx/([\d.]+)").with_product("nginx").with_version("$1"),
        ]);
        let analysis = BannerAnalyzer::analyze(&rules, "Server: nginx/1.18.0", true);

        assert_eq!(analysis.results[0].cpe, "cpe:/a:igor_sysoev:nginx:1.18.0");
        assert_eq!(analysis.results[1].cpe, "cpe:/a:*:nginx:1.18.0");
    }

    #[test]
    fn test_analyze_orders_by_confidence_and_skips_inert() {
        let rules = compile(vec![
            Rule::new("low", "banner").with_id("low").with_confidence(50),
            Rule::new("broken", "(banner").with_id("broken").with_confidence(100),
            Rule::new("high", "banner").with_id("high").with_confidence(90),
            Rule::new("tie", "banner").with_id("tie").with_confidence(50),
        ]);
        let analysis = BannerAnalyzer::analyze(&rules, "some banner", true);

        let ids: Vec<&str> = analysis.results.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "tie"]);
        assert_eq!(analysis.evaluations, 3);
    }
}
