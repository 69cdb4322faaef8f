//! 卡组生成
//!
//! 准入之后的工作：文档切块 -> 每块一次 LLM 调用 -> 汇总为卡组。
//! 外部协作方通过 trait 注入，生产环境使用纯文本切块与 HTTP 生成服务。

pub mod generator;
pub mod http_client;
pub mod text_pipeline;

use async_trait::async_trait;
use std::time::Duration;

use crate::admission::PoolClosed;
use crate::model::{DensityTier, Flashcard};

pub use generator::{DeckGenerator, GeneratedDeck, GeneratorSettings};
pub use http_client::HttpGenerationClient;
pub use text_pipeline::PlainTextPipeline;

/// 生成错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("document too large: {chars} characters (max {max})")]
    DocumentTooLarge { chars: usize, max: usize },

    #[error("document contains no usable text")]
    EmptyDocument,

    #[error("generation service error: {0}")]
    Upstream(String),

    #[error("generation call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Capacity(#[from] PoolClosed),

    #[error("storage error: {0}")]
    Storage(String),
}

/// 对单个文本块的生成请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRequest {
    pub chunk_index: usize,
    pub text: String,
    pub density: DensityTier,
    /// 本块最多生成的卡片数
    pub max_cards: u32,
}

/// 文档处理：原始字节 -> 文本块
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    async fn extract_chunks(&self, filename: &str, bytes: &[u8]) -> Result<Vec<String>, GenerationError>;
}

/// 生成服务客户端：一次调用处理一个文本块
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate_cards(&self, request: &CardRequest) -> Result<Vec<Flashcard>, GenerationError>;
}
