//! 单个已准入任务的执行
//!
//! 每次 LLM 调用都在 LLM 调用槽位内进行，并带单次超时。
//! 单块失败只计数不中断；任务结束后按退还策略结算租约。

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CardRequest, DocumentPipeline, GenerationClient, GenerationError};
use crate::admission::{GenerationLease, LeaseSettlement, LlmCallSemaphore};
use crate::infra::{metrics, UploadStore};
use crate::model::{Deck, Flashcard};

/// 生成任务参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorSettings {
    /// 单个文档最多处理的文本块数
    pub max_chunks_per_document: usize,
    /// 单个文档同时进行的 LLM 调用数
    pub max_llm_calls_per_document: usize,
    /// 单次 LLM 调用超时
    pub llm_call_timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_chunks_per_document: 50,
            max_llm_calls_per_document: 20,
            llm_call_timeout: Duration::from_secs(60),
        }
    }
}

/// 生成结果
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDeck {
    pub deck: Deck,
    pub settlement: LeaseSettlement,
}

/// 卡组生成器
pub struct DeckGenerator {
    pipeline: Arc<dyn DocumentPipeline>,
    client: Arc<dyn GenerationClient>,
    llm: LlmCallSemaphore,
    uploads: UploadStore,
    settings: GeneratorSettings,
}

impl DeckGenerator {
    pub fn new(
        pipeline: Arc<dyn DocumentPipeline>,
        client: Arc<dyn GenerationClient>,
        llm: LlmCallSemaphore,
        uploads: UploadStore,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            pipeline,
            client,
            llm,
            uploads,
            settings,
        }
    }

    pub fn llm(&self) -> &LlmCallSemaphore {
        &self.llm
    }

    pub fn settings(&self) -> GeneratorSettings {
        self.settings
    }

    /// 执行任务并结算租约
    ///
    /// 出错时以 0 张卡结算。future 被取消时租约随之 drop，资源同样会释放。
    pub async fn run(&self, mut lease: GenerationLease) -> Result<GeneratedDeck, (GenerationError, LeaseSettlement)> {
        let started = Instant::now();
        match self.generate(&lease).await {
            Ok(deck) => {
                let settlement = lease.finish(deck.cards.len()).await;
                metrics::record_deck_generated(deck.cards.len());
                info!(
                    "🃏 卡组生成完成: request_id={}, account_id={}, cards={}, chunks={}, failed={}, elapsed={:?}",
                    lease.request_id(),
                    lease.account_id(),
                    deck.cards.len(),
                    deck.chunks_processed,
                    deck.chunks_failed,
                    started.elapsed()
                );
                Ok(GeneratedDeck { deck, settlement })
            }
            Err(e) => {
                let settlement = lease.finish(0).await;
                warn!(
                    "❌ 卡组生成失败: request_id={}, account_id={}, error={}, quota_refunded={}",
                    lease.request_id(),
                    lease.account_id(),
                    e,
                    settlement.quota_refunded
                );
                Err((e, settlement))
            }
        }
    }

    async fn generate(&self, lease: &GenerationLease) -> Result<Deck, GenerationError> {
        let upload = lease
            .upload()
            .cloned()
            .ok_or_else(|| GenerationError::InvalidDocument("no document attached".to_string()))?;
        let bytes = self
            .uploads
            .read(&upload)
            .await
            .map_err(|e| GenerationError::Storage(e.to_string()))?;

        let mut chunks = self.pipeline.extract_chunks(&upload.filename, &bytes).await?;
        if chunks.len() > self.settings.max_chunks_per_document {
            debug!(
                "文本块超出上限，截断: {} -> {}",
                chunks.len(),
                self.settings.max_chunks_per_document
            );
            chunks.truncate(self.settings.max_chunks_per_document);
        }
        let chunks_processed = chunks.len();

        let density = lease.density();
        let requests: Vec<CardRequest> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| CardRequest {
                chunk_index,
                text,
                density,
                max_cards: density.cards_per_chunk(),
            })
            .collect();

        let results: Vec<Result<Vec<Flashcard>, GenerationError>> = stream::iter(requests)
            .map(|request| async move { self.call_chunk(&request).await })
            .buffered(self.settings.max_llm_calls_per_document.max(1))
            .collect()
            .await;

        let mut cards = Vec::new();
        let mut chunks_failed = 0;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(chunk_cards) => cards.extend(chunk_cards.into_iter().filter(Flashcard::is_valid)),
                Err(e) => {
                    chunks_failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if chunks_failed == chunks_processed {
            return Err(last_error.unwrap_or(GenerationError::EmptyDocument));
        }

        if let Some(max_cards) = lease.plan().max_cards_per_deck {
            cards.truncate(max_cards as usize);
        }

        Ok(Deck {
            account_id: lease.account_id(),
            density,
            source_filename: upload.filename.clone(),
            cards,
            chunks_processed,
            chunks_failed,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    async fn call_chunk(&self, request: &CardRequest) -> Result<Vec<Flashcard>, GenerationError> {
        let timeout = self.settings.llm_call_timeout;
        let started = Instant::now();
        let result = self
            .llm
            .with_slot(tokio::time::timeout(timeout, self.client.generate_cards(request)))
            .await?
            .unwrap_or(Err(GenerationError::Timeout(timeout)));

        metrics::record_llm_call(started.elapsed().as_secs_f64(), result.is_ok());
        if let Err(e) = &result {
            warn!("⚠️ 文本块生成失败: chunk={}, error={}", request.chunk_index, e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{
        AccountGenerationTracker, AdmissionController, AdmissionRequest, FixedPeriodClock, GenerationSemaphore,
        PlanResolver, QuotaLedger,
    };
    use crate::generation::PlainTextPipeline;
    use crate::model::AccountRecord;
    use crate::repository::{AccountStore, MemoryAccountStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 每块返回固定数量卡片；包含 "fail" 的块返回错误
    struct ScriptedClient {
        cards_per_chunk: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(cards_per_chunk: usize) -> Self {
            Self {
                cards_per_chunk,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate_cards(&self, request: &CardRequest) -> Result<Vec<Flashcard>, GenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.text.contains("fail") {
                return Err(GenerationError::Upstream("scripted failure".to_string()));
            }
            Ok((0..self.cards_per_chunk)
                .map(|i| Flashcard::new(format!("Q{}-{}", request.chunk_index, i), "A"))
                .collect())
        }
    }

    async fn setup(plan: &str, max_llm: usize, client: Arc<dyn GenerationClient>) -> (AdmissionController, DeckGenerator) {
        let store = Arc::new(MemoryAccountStore::new());
        store.insert(AccountRecord::new(1, plan));
        let store: Arc<dyn AccountStore> = store;
        let ledger = Arc::new(QuotaLedger::new(store.clone(), Arc::new(FixedPeriodClock::new("2026-10"))));
        let uploads = UploadStore::memory().unwrap();
        let controller = AdmissionController::new(
            store,
            ledger,
            Arc::new(PlanResolver::builtin()),
            GenerationSemaphore::new(2),
            Arc::new(AccountGenerationTracker::new()),
            uploads.clone(),
        );
        let generator = DeckGenerator::new(
            Arc::new(PlainTextPipeline::new(10_000, 10)),
            client,
            LlmCallSemaphore::new(max_llm),
            uploads,
            GeneratorSettings::default(),
        );
        (controller, generator)
    }

    #[tokio::test]
    async fn test_free_plan_deck_is_capped() {
        let (controller, generator) = setup("free", 6, Arc::new(ScriptedClient::new(8))).await;
        let text = (0..5).map(|i| format!("para {}", i)).collect::<Vec<_>>().join("\n\n");
        let lease = controller
            .check_and_reserve(AdmissionRequest::new(1).with_document("notes.txt", Bytes::from(text)))
            .await
            .unwrap();
        let upload = lease.upload().cloned().unwrap();

        let generated = generator.run(lease).await.unwrap();
        assert_eq!(generated.deck.chunks_processed, 5);
        assert_eq!(generated.deck.cards.len(), 20);
        assert!(!generated.settlement.quota_refunded);
        // 任务结束后槽位与上传文件都已释放
        assert_eq!(controller.generation().in_flight(), 0);
        assert!(!controller.tracker().is_active(1));
        assert!(!controller.uploads().exists(&upload).await);
        assert_eq!(controller.ledger().usage(1, 3).await.unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_llm_calls_bounded_by_semaphore() {
        let client = Arc::new(ScriptedClient::new(1));
        let (controller, generator) = setup("paid", 2, client.clone()).await;
        let text = (0..8).map(|i| format!("chunk {}", i)).collect::<Vec<_>>().join("\n\n");
        let lease = controller
            .check_and_reserve(AdmissionRequest::new(1).with_document("notes.txt", Bytes::from(text)))
            .await
            .unwrap();

        let generated = generator.run(lease).await.unwrap();
        assert_eq!(generated.deck.cards.len(), 8);
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(generator.llm().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_partial_failures_are_tolerated() {
        let (controller, generator) = setup("paid", 6, Arc::new(ScriptedClient::new(2))).await;
        let lease = controller
            .check_and_reserve(
                AdmissionRequest::new(1).with_document("notes.txt", Bytes::from_static(b"good one\n\nfail now\n\ngood two")),
            )
            .await
            .unwrap();

        let generated = generator.run(lease).await.unwrap();
        assert_eq!(generated.deck.chunks_failed, 1);
        assert_eq!(generated.deck.cards.len(), 4);
    }

    #[tokio::test]
    async fn test_total_failure_refunds_quota() {
        let (controller, generator) = setup("paid", 6, Arc::new(ScriptedClient::new(2))).await;
        let lease = controller
            .check_and_reserve(AdmissionRequest::new(1).with_document("notes.txt", Bytes::from_static(b"fail")))
            .await
            .unwrap();

        let (err, settlement) = generator.run(lease).await.unwrap_err();
        assert!(matches!(err, GenerationError::Upstream(_)));
        assert!(settlement.quota_refunded);
        assert_eq!(controller.ledger().usage(1, 50).await.unwrap().used, 0);
        assert_eq!(controller.generation().in_flight(), 0);
    }
}
