//! 套餐解析：套餐名 -> 限制
//!
//! 启动时从配置构建，之后只读，可在任意任务中并发调用。

use std::collections::HashMap;

use crate::model::{DensityTier, PlanLimits};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("plan not found: {0}")]
    UnknownPlan(String),
}

/// 套餐解析器
#[derive(Debug, Clone)]
pub struct PlanResolver {
    plans: HashMap<String, PlanLimits>,
}

impl PlanResolver {
    /// 从套餐列表构建；同名套餐以后出现的为准
    pub fn new(plans: impl IntoIterator<Item = PlanLimits>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// 内置套餐（free / paid）
    pub fn builtin() -> Self {
        Self::new([PlanLimits::free(), PlanLimits::paid()])
    }

    pub fn resolve(&self, plan_name: &str) -> Result<&PlanLimits, PlanError> {
        self.plans
            .get(plan_name.trim())
            .ok_or_else(|| PlanError::UnknownPlan(plan_name.to_string()))
    }

    pub fn contains(&self, plan_name: &str) -> bool {
        self.plans.contains_key(plan_name.trim())
    }

    /// 套餐是否允许该密度；未知套餐、无法识别的密度一律视为不允许
    pub fn is_density_allowed(&self, plan_name: &str, density: &str) -> bool {
        match (self.resolve(plan_name), DensityTier::parse(density)) {
            (Ok(plan), Some(tier)) => plan.allows_density(tier),
            _ => false,
        }
    }

    /// 套餐允许的密度；未知套餐只给出最低档
    pub fn allowed_densities(&self, plan_name: &str) -> Vec<DensityTier> {
        self.resolve(plan_name)
            .map(|p| p.allowed_densities.clone())
            .unwrap_or_else(|_| vec![DensityTier::Low])
    }

    pub fn plan_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plans.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PlanResolver {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin_plans() {
        let resolver = PlanResolver::builtin();
        assert_eq!(resolver.resolve("free").unwrap().pdfs_per_month, 3);
        assert_eq!(resolver.resolve("paid").unwrap().max_cards_per_deck, None);
        assert_eq!(resolver.plan_names(), vec!["free", "paid"]);
    }

    #[test]
    fn test_unknown_plan() {
        let resolver = PlanResolver::builtin();
        assert_eq!(
            resolver.resolve("enterprise"),
            Err(PlanError::UnknownPlan("enterprise".to_string()))
        );
        assert_eq!(resolver.allowed_densities("enterprise"), vec![DensityTier::Low]);
    }

    #[test]
    fn test_density_check_normalizes_input() {
        let resolver = PlanResolver::builtin();
        assert!(resolver.is_density_allowed("free", " LOW "));
        assert!(!resolver.is_density_allowed("free", "high"));
        assert!(resolver.is_density_allowed("paid", "High"));
        assert!(!resolver.is_density_allowed("paid", ""));
        assert!(!resolver.is_density_allowed("paid", "extreme"));
    }

    #[test]
    fn test_configured_plan_overrides_builtin() {
        let mut free = PlanLimits::free();
        free.pdfs_per_month = 10;
        let resolver = PlanResolver::new([PlanLimits::free(), free]);
        assert_eq!(resolver.resolve("free").unwrap().pdfs_per_month, 10);
    }
}
