//! 准入租约与补偿栈
//!
//! 准入过程中每获得一项资源就压入一条补偿记录；拒绝时按 LIFO 顺序撤销。
//! 准入成功后补偿栈交给 `GenerationLease`，由它在任务结束（或被丢弃）时释放。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::account_tracker::AccountSlot;
use super::generation_semaphore::GenerationPermit;
use super::quota_ledger::QuotaLedger;
use crate::infra::{StoredUpload, UploadStore};
use crate::model::{AccountId, DensityTier, PlanLimits};

/// 任务结束后是否退还配额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QuotaRefundPolicy {
    /// 没有生成任何卡片时退还
    NoArtifact,
    /// 卡片数低于阈值时退还
    BelowThreshold { min_cards: usize },
    /// 从不退还
    Never,
}

impl Default for QuotaRefundPolicy {
    fn default() -> Self {
        QuotaRefundPolicy::NoArtifact
    }
}

impl QuotaRefundPolicy {
    pub fn should_refund(&self, cards_generated: usize) -> bool {
        match self {
            QuotaRefundPolicy::NoArtifact => cards_generated == 0,
            QuotaRefundPolicy::BelowThreshold { min_cards } => cards_generated < *min_cards,
            QuotaRefundPolicy::Never => false,
        }
    }
}

/// 已扣减但尚未结算的一个配额单位
///
/// 必须通过 `commit` 或 `refund` 结算。未结算就被 drop 时按 `refund_on_drop`
/// 处理：为真则在当前 runtime 上异步退还，否则保留扣减。
pub struct QuotaReservation {
    ledger: Arc<QuotaLedger>,
    account_id: AccountId,
    period_key: String,
    settled: bool,
    refund_on_drop: bool,
}

impl QuotaReservation {
    pub fn new(ledger: Arc<QuotaLedger>, account_id: AccountId, period_key: String) -> Self {
        Self {
            ledger,
            account_id,
            period_key,
            settled: false,
            refund_on_drop: true,
        }
    }

    pub fn period_key(&self) -> &str {
        &self.period_key
    }

    pub(crate) fn set_refund_on_drop(&mut self, refund: bool) {
        self.refund_on_drop = refund;
    }

    /// 保留扣减
    pub fn commit(mut self) {
        self.settled = true;
    }

    /// 退还扣减；失败只记录日志
    pub async fn refund(mut self) {
        self.settled = true;
        if let Err(e) = self.ledger.release_for_period(self.account_id, &self.period_key).await {
            warn!(
                "⚠️ 配额退还失败: account_id={}, period={}, error={}",
                self.account_id, self.period_key, e
            );
        }
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if !self.refund_on_drop {
            debug!(
                "未结算配额按退还策略保留: account_id={}, period={}",
                self.account_id, self.period_key
            );
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        let account_id = self.account_id;
        let period_key = std::mem::take(&mut self.period_key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = ledger.release_for_period(account_id, &period_key).await {
                        warn!(
                            "⚠️ 未结算配额退还失败: account_id={}, period={}, error={}",
                            account_id, period_key, e
                        );
                    }
                });
            }
            Err(_) => warn!(
                "⚠️ 无可用 runtime，未结算配额无法退还: account_id={}, period={}",
                account_id, period_key
            ),
        }
    }
}

/// 一条补偿记录
pub enum Compensation {
    RefundQuota(QuotaReservation),
    DiscardUpload { store: UploadStore, upload: StoredUpload },
    ReleaseGlobalSlot(GenerationPermit),
    ReleaseAccountSlot(AccountSlot),
}

impl Compensation {
    fn label(&self) -> &'static str {
        match self {
            Compensation::RefundQuota(_) => "refund_quota",
            Compensation::DiscardUpload { .. } => "discard_upload",
            Compensation::ReleaseGlobalSlot(_) => "release_global_slot",
            Compensation::ReleaseAccountSlot(_) => "release_account_slot",
        }
    }
}

/// 补偿栈（LIFO）
///
/// `release_all` 可重复调用，第二次起为空操作。
#[derive(Default)]
pub struct ReleaseHandles {
    stack: Vec<Compensation>,
}

impl ReleaseHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compensation: Compensation) {
        self.stack.push(compensation);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// 栈中记录的上传文档
    pub fn upload(&self) -> Option<&StoredUpload> {
        self.stack.iter().find_map(|c| match c {
            Compensation::DiscardUpload { upload, .. } => Some(upload),
            _ => None,
        })
    }

    /// 设置未结算就被丢弃时是否退还配额
    pub(crate) fn set_unsettled_refund(&mut self, refund: bool) {
        for compensation in &mut self.stack {
            if let Compensation::RefundQuota(reservation) = compensation {
                reservation.set_refund_on_drop(refund);
            }
        }
    }

    /// 按获取的逆序释放全部资源
    ///
    /// `refund_quota = false` 时保留配额扣减（任务已交付结果）。
    pub async fn release_all(&mut self, refund_quota: bool) {
        while let Some(compensation) = self.stack.pop() {
            debug!("↩️ 执行补偿: {}", compensation.label());
            match compensation {
                Compensation::RefundQuota(reservation) => {
                    if refund_quota {
                        reservation.refund().await;
                    } else {
                        reservation.commit();
                    }
                }
                Compensation::DiscardUpload { store, upload } => store.discard(&upload).await,
                Compensation::ReleaseGlobalSlot(permit) => permit.release(),
                Compensation::ReleaseAccountSlot(slot) => slot.release(),
            }
        }
    }
}

impl Drop for ReleaseHandles {
    fn drop(&mut self) {
        // 未显式释放（取消、panic）：槽位同步归还，上传文件在 runtime 上删除，
        // 配额由 QuotaReservation 自身的 Drop 按 refund_on_drop 处理
        while let Some(compensation) = self.stack.pop() {
            match compensation {
                Compensation::DiscardUpload { store, upload } => {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(async move { store.discard(&upload).await });
                    } else {
                        warn!("⚠️ 无可用 runtime，上传文档未删除: key={}", upload.key);
                    }
                }
                other => drop(other),
            }
        }
    }
}

/// 任务结算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaseSettlement {
    pub cards_generated: usize,
    pub quota_refunded: bool,
}

/// 准入成功后的租约
///
/// 持有全局槽位、账号槽位、配额扣减和上传文档。drop 即释放全部资源，
/// 覆盖成功、失败、panic 和客户端断开等所有退出路径。未结算就被 drop
/// 视为没有产出卡片，是否退还配额与 `finish(0)` 一致。
pub struct GenerationLease {
    handles: ReleaseHandles,
    account_id: AccountId,
    plan: PlanLimits,
    density: DensityTier,
    refund_policy: QuotaRefundPolicy,
    request_id: uuid::Uuid,
    used_count: u32,
    admitted_at: Instant,
}

impl std::fmt::Debug for GenerationLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLease")
            .field("account_id", &self.account_id)
            .field("plan", &self.plan)
            .field("density", &self.density)
            .field("refund_policy", &self.refund_policy)
            .field("request_id", &self.request_id)
            .field("used_count", &self.used_count)
            .field("admitted_at", &self.admitted_at)
            .finish_non_exhaustive()
    }
}

impl GenerationLease {
    pub(crate) fn new(
        mut handles: ReleaseHandles,
        account_id: AccountId,
        plan: PlanLimits,
        density: DensityTier,
        refund_policy: QuotaRefundPolicy,
        used_count: u32,
    ) -> Self {
        handles.set_unsettled_refund(refund_policy.should_refund(0));
        Self {
            handles,
            account_id,
            plan,
            density,
            refund_policy,
            request_id: uuid::Uuid::new_v4(),
            used_count,
            admitted_at: Instant::now(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn plan(&self) -> &PlanLimits {
        &self.plan
    }

    pub fn density(&self) -> DensityTier {
        self.density
    }

    pub fn request_id(&self) -> uuid::Uuid {
        self.request_id
    }

    /// 准入后本周期的已用次数
    pub fn used_count(&self) -> u32 {
        self.used_count
    }

    pub fn upload(&self) -> Option<&StoredUpload> {
        self.handles.upload()
    }

    pub fn is_released(&self) -> bool {
        self.handles.is_empty()
    }

    /// 按退还策略结算并释放全部资源
    pub async fn finish(&mut self, cards_generated: usize) -> LeaseSettlement {
        let quota_refunded = self.refund_policy.should_refund(cards_generated);
        self.release_all(quota_refunded).await;
        debug!(
            "🏁 租约已结算: request_id={}, account_id={}, cards={}, refunded={}, elapsed={:?}",
            self.request_id,
            self.account_id,
            cards_generated,
            quota_refunded,
            self.admitted_at.elapsed()
        );
        LeaseSettlement {
            cards_generated,
            quota_refunded,
        }
    }

    /// 幂等的释放入口
    pub async fn release_all(&mut self, refund_quota: bool) {
        self.handles.release_all(refund_quota).await;
    }
}
