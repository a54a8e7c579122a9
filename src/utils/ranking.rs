//! 检测结果排序工具
//! 按置信度降序排列，置信度相同的结果保持规则的加入顺序

use crate::rule::ServiceInfo;

/// 结果排序工具
pub struct ResultRanker;

impl ResultRanker {
    /// 稳定排序：置信度高者在前
    pub fn rank(results: &mut [ServiceInfo]) {
        if results.len() > 1 {
            results.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        }
    }

    /// 过滤低于阈值的结果（保持原有顺序）
    pub fn filter_min_confidence(results: Vec<ServiceInfo>, min_confidence: u8) -> Vec<ServiceInfo> {
        if min_confidence == 0 {
            return results;
        }
        results
            .into_iter()
            .filter(|r| r.confidence >= min_confidence)
            .collect()
    }
}
