//! 套餐与生成密度模型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 生成密度档位：决定每个文本块生成卡片的丰富程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityTier {
    Low,
    Medium,
    High,
}

impl DensityTier {
    pub const ALL: [DensityTier; 3] = [DensityTier::Low, DensityTier::Medium, DensityTier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            DensityTier::Low => "low",
            DensityTier::Medium => "medium",
            DensityTier::High => "high",
        }
    }

    /// 解析客户端传入的密度（忽略大小写与首尾空白）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(DensityTier::Low),
            "medium" => Some(DensityTier::Medium),
            "high" => Some(DensityTier::High),
            _ => None,
        }
    }

    /// 每个文本块期望生成的卡片数（提示词参数）
    pub fn cards_per_chunk(&self) -> u32 {
        match self {
            DensityTier::Low => 3,
            DensityTier::Medium => 6,
            DensityTier::High => 10,
        }
    }
}

impl Default for DensityTier {
    fn default() -> Self {
        DensityTier::Low
    }
}

impl fmt::Display for DensityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 套餐限制（静态配置，按名称查找，请求期间只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// 套餐名称（与账号的 plan_name 对应）
    pub name: String,
    /// 展示名称
    pub display_name: String,
    /// 每月可处理的 PDF 数
    pub pdfs_per_month: u32,
    /// 允许的生成密度
    pub allowed_densities: Vec<DensityTier>,
    /// 单个卡组最多卡片数（None 表示不限制）
    pub max_cards_per_deck: Option<u32>,
    /// 套餐特性描述
    #[serde(default)]
    pub features: Vec<String>,
}

impl PlanLimits {
    /// 免费套餐
    pub fn free() -> Self {
        Self {
            name: "free".to_string(),
            display_name: "Free".to_string(),
            pdfs_per_month: 3,
            allowed_densities: vec![DensityTier::Low],
            max_cards_per_deck: Some(20),
            features: vec![
                "3 PDFs per month".to_string(),
                "Low density decks".to_string(),
                "Up to 20 cards per deck".to_string(),
            ],
        }
    }

    /// 付费套餐
    pub fn paid() -> Self {
        Self {
            name: "paid".to_string(),
            display_name: "Pro".to_string(),
            pdfs_per_month: 50,
            allowed_densities: DensityTier::ALL.to_vec(),
            max_cards_per_deck: None,
            features: vec![
                "50 PDFs per month".to_string(),
                "All densities".to_string(),
                "Unlimited cards per deck".to_string(),
            ],
        }
    }

    pub fn allows_density(&self, density: DensityTier) -> bool {
        self.allowed_densities.contains(&density)
    }
}
