//! 准入流水线
//!
//! 顺序固定为：解析套餐 -> 扣减配额 -> 暂存上传文档 -> 密度检查 -> 全局槽位 -> 账号槽位。
//! 全程只使用非阻塞获取，满载时快速失败。任何一步被拒绝，
//! 之前已获得的资源都按获取的逆序撤销。

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::account_tracker::AccountGenerationTracker;
use super::generation_semaphore::GenerationSemaphore;
use super::lease::{Compensation, GenerationLease, QuotaRefundPolicy, QuotaReservation, ReleaseHandles};
use super::plan_resolver::PlanResolver;
use super::quota_ledger::{QuotaError, QuotaLedger, QuotaUsage};
use crate::infra::{metrics, UploadStore};
use crate::model::{AccountId, DensityTier, PlanLimits};
use crate::repository::AccountStore;

/// 请求携带的文档
#[derive(Debug, Clone)]
pub struct IncomingDocument {
    pub filename: String,
    pub bytes: Bytes,
}

/// 一次准入请求
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub account_id: AccountId,
    /// 请求的卡片密度；缺省为 low
    pub density: Option<String>,
    pub document: Option<IncomingDocument>,
}

impl AdmissionRequest {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            density: None,
            document: None,
        }
    }

    pub fn with_density(mut self, density: impl Into<String>) -> Self {
        self.density = Some(density.into());
        self
    }

    pub fn with_document(mut self, filename: impl Into<String>, bytes: Bytes) -> Self {
        self.document = Some(IncomingDocument {
            filename: filename.into(),
            bytes,
        });
        self
    }
}

/// 准入拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionRejection {
    #[error("monthly quota exhausted on the {plan} plan ({used}/{limit})")]
    QuotaExceeded { plan: String, limit: u32, used: u32 },

    #[error("generation capacity is saturated, retry in {}s", retry_after.as_secs())]
    GlobalCapacitySaturated { retry_after: Duration },

    #[error("a generation is already in progress for this account, retry in {}s", retry_after.as_secs())]
    AccountBusy { retry_after: Duration },

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("density '{requested}' is not available on the {plan} plan")]
    OptionNotPermitted {
        plan: String,
        requested: String,
        allowed: Vec<DensityTier>,
    },

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AdmissionRejection {
    /// 机器可读的拒绝原因
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionRejection::QuotaExceeded { .. } => "quota_exceeded",
            AdmissionRejection::GlobalCapacitySaturated { .. } => "global_capacity_saturated",
            AdmissionRejection::AccountBusy { .. } => "account_busy",
            AdmissionRejection::PlanNotFound(_) => "plan_not_found",
            AdmissionRejection::OptionNotPermitted { .. } => "option_not_permitted",
            AdmissionRejection::AccountNotFound(_) => "account_not_found",
            AdmissionRejection::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// 建议的重试等待时间（仅容量类拒绝）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionRejection::GlobalCapacitySaturated { retry_after }
            | AdmissionRejection::AccountBusy { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<QuotaError> for AdmissionRejection {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::AccountNotFound(id) => AdmissionRejection::AccountNotFound(id),
            QuotaError::StorageUnavailable(msg) => AdmissionRejection::StorageUnavailable(msg),
        }
    }
}

/// 账号的套餐与配额概览
#[derive(Debug, Clone, Serialize)]
pub struct AccountLimits {
    pub account_id: AccountId,
    pub plan: String,
    pub display_name: String,
    pub quota: QuotaUsage,
    pub allowed_densities: Vec<DensityTier>,
    pub max_cards_per_deck: Option<u32>,
    pub features: Vec<String>,
    pub generation_in_progress: bool,
}

/// 准入控制器
///
/// 进程启动时构建一次，通过 `Arc` 注入到 HTTP 层。
pub struct AdmissionController {
    store: Arc<dyn AccountStore>,
    ledger: Arc<QuotaLedger>,
    plans: Arc<PlanResolver>,
    generation: GenerationSemaphore,
    tracker: Arc<AccountGenerationTracker>,
    uploads: UploadStore,
    retry_after: Duration,
    refund_policy: QuotaRefundPolicy,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn AccountStore>,
        ledger: Arc<QuotaLedger>,
        plans: Arc<PlanResolver>,
        generation: GenerationSemaphore,
        tracker: Arc<AccountGenerationTracker>,
        uploads: UploadStore,
    ) -> Self {
        Self {
            store,
            ledger,
            plans,
            generation,
            tracker,
            uploads,
            retry_after: Duration::from_secs(60),
            refund_policy: QuotaRefundPolicy::default(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_refund_policy(mut self, policy: QuotaRefundPolicy) -> Self {
        self.refund_policy = policy;
        self
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn plans(&self) -> &Arc<PlanResolver> {
        &self.plans
    }

    pub fn generation(&self) -> &GenerationSemaphore {
        &self.generation
    }

    pub fn tracker(&self) -> &Arc<AccountGenerationTracker> {
        &self.tracker
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn refund_policy(&self) -> QuotaRefundPolicy {
        self.refund_policy
    }

    /// 快速失败的准入决定
    ///
    /// 成功时返回持有全部资源的租约；失败时已获得的资源都已撤销。
    pub async fn check_and_reserve(&self, request: AdmissionRequest) -> Result<GenerationLease, AdmissionRejection> {
        let account_id = request.account_id;
        let mut handles = ReleaseHandles::new();

        match self.reserve(request, &mut handles).await {
            Ok(lease) => {
                metrics::record_admission("admitted");
                info!(
                    "✅ 生成请求已准入: account_id={}, request_id={}, density={}, used={}/{}",
                    lease.account_id(),
                    lease.request_id(),
                    lease.density(),
                    lease.used_count(),
                    lease.plan().pdfs_per_month
                );
                Ok(lease)
            }
            Err(rejection) => {
                handles.release_all(true).await;
                metrics::record_admission(rejection.code());
                match &rejection {
                    AdmissionRejection::StorageUnavailable(_) | AdmissionRejection::PlanNotFound(_) => {
                        warn!("⚠️ 准入失败: account_id={}, reason={}", account_id, rejection)
                    }
                    _ => info!(
                        "🚫 准入被拒绝: account_id={}, code={}, reason={}",
                        account_id,
                        rejection.code(),
                        rejection
                    ),
                }
                Err(rejection)
            }
        }
    }

    async fn reserve(
        &self,
        request: AdmissionRequest,
        handles: &mut ReleaseHandles,
    ) -> Result<GenerationLease, AdmissionRejection> {
        let account_id = request.account_id;
        let plan = self.resolve_account_plan(account_id).await?;

        // 1. 配额：用尽时没有任何资源需要撤销
        let outcome = self.ledger.try_consume(account_id, plan.pdfs_per_month).await?;
        if !outcome.consumed {
            return Err(AdmissionRejection::QuotaExceeded {
                plan: plan.name.clone(),
                limit: plan.pdfs_per_month,
                used: outcome.used_count,
            });
        }
        handles.push(Compensation::RefundQuota(QuotaReservation::new(
            Arc::clone(&self.ledger),
            account_id,
            outcome.period_key.clone(),
        )));

        // 2. 暂存上传文档
        if let Some(document) = request.document {
            let upload = self
                .uploads
                .save(account_id, &document.filename, document.bytes)
                .await
                .map_err(|e| AdmissionRejection::StorageUnavailable(e.to_string()))?;
            handles.push(Compensation::DiscardUpload {
                store: self.uploads.clone(),
                upload,
            });
        }

        // 3. 密度
        let density = self.check_density(&plan, request.density.as_deref())?;

        // 4. 全局槽位
        let permit = self
            .generation
            .try_acquire()
            .ok_or(AdmissionRejection::GlobalCapacitySaturated {
                retry_after: self.retry_after,
            })?;
        handles.push(Compensation::ReleaseGlobalSlot(permit));

        // 5. 账号槽位
        let slot = self
            .tracker
            .try_lease(account_id)
            .ok_or(AdmissionRejection::AccountBusy {
                retry_after: self.retry_after,
            })?;
        handles.push(Compensation::ReleaseAccountSlot(slot));

        debug!(
            "准入资源已全部获得: account_id={}, period={}, compensations={}",
            account_id,
            outcome.period_key,
            handles.len()
        );

        Ok(GenerationLease::new(
            std::mem::take(handles),
            account_id,
            plan,
            density,
            self.refund_policy,
            outcome.used_count,
        ))
    }

    /// 账号当前套餐与配额
    pub async fn account_limits(&self, account_id: AccountId) -> Result<AccountLimits, AdmissionRejection> {
        let plan = self.resolve_account_plan(account_id).await?;
        let quota = self.ledger.usage(account_id, plan.pdfs_per_month).await?;
        Ok(AccountLimits {
            account_id,
            plan: plan.name.clone(),
            display_name: plan.display_name.clone(),
            quota,
            allowed_densities: self.plans.allowed_densities(&plan.name),
            max_cards_per_deck: plan.max_cards_per_deck,
            features: plan.features.clone(),
            generation_in_progress: self.tracker.is_active(account_id),
        })
    }

    async fn resolve_account_plan(&self, account_id: AccountId) -> Result<PlanLimits, AdmissionRejection> {
        let record = self
            .store
            .find_account(account_id)
            .await
            .map_err(|e| AdmissionRejection::StorageUnavailable(e.to_string()))?
            .ok_or(AdmissionRejection::AccountNotFound(account_id))?;

        self.plans
            .resolve(&record.plan_name)
            .cloned()
            .map_err(|_| AdmissionRejection::PlanNotFound(record.plan_name.clone()))
    }

    fn check_density(&self, plan: &PlanLimits, requested: Option<&str>) -> Result<DensityTier, AdmissionRejection> {
        // 未指定或空白的密度按最低档处理
        let requested = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DensityTier::default().as_str());
        match DensityTier::parse(requested) {
            Some(tier) if self.plans.is_density_allowed(&plan.name, requested) => Ok(tier),
            _ => Err(AdmissionRejection::OptionNotPermitted {
                plan: plan.name.clone(),
                requested: requested.to_string(),
                allowed: self.plans.allowed_densities(&plan.name),
            }),
        }
    }
}
