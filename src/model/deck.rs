//! 卡组（生成产物）模型

use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::plan::DensityTier;

/// 单张闪卡
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

impl Flashcard {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
        }
    }

    /// 正反面都不能为空
    pub fn is_valid(&self) -> bool {
        !self.front.trim().is_empty() && !self.back.trim().is_empty()
    }
}

/// 一次生成任务的产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deck {
    pub account_id: AccountId,
    pub density: DensityTier,
    pub source_filename: String,
    pub cards: Vec<Flashcard>,
    /// 实际送入 LLM 的文本块数
    pub chunks_processed: usize,
    /// 调用失败（超时或出错）的文本块数
    pub chunks_failed: usize,
    /// 生成时间（毫秒时间戳）
    pub created_at: i64,
}
