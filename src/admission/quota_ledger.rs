//! 月度配额账本
//!
//! 所有写入都走同一个 compare-and-set 循环：读取计数器 -> 必要时按新周期归零 ->
//! 计算目标值 -> CAS 写回。周期重置与扣减在同一次 CAS 中完成，因此：
//! - 同一账号并发 `try_consume` 不会超过上限（不会丢失更新）
//! - 跨周期并发读取时只有一次重置生效，之后不会被再次归零

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::infra::metrics;
use crate::model::{AccountId, AccountQuotaState, AccountRecord, QuotaCounter};
use crate::repository::{AccountStore, StoreError};

/// CAS 冲突重试上限，超过后按存储不可用处理（fail closed）
const MAX_CAS_ATTEMPTS: usize = 32;

/// 当前计费周期来源
pub trait PeriodClock: Send + Sync {
    /// 返回当前周期标识（YYYY-MM）
    fn current_period(&self) -> String;
}

/// 系统时钟（UTC 自然月）
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcMonthClock;

impl PeriodClock for UtcMonthClock {
    fn current_period(&self) -> String {
        chrono::Utc::now().format("%Y-%m").to_string()
    }
}

/// 可手动设置的周期时钟（运维演练、测试跨月场景）
#[derive(Debug)]
pub struct FixedPeriodClock {
    period: RwLock<String>,
}

impl FixedPeriodClock {
    pub fn new(period: impl Into<String>) -> Self {
        Self {
            period: RwLock::new(period.into()),
        }
    }

    pub fn set(&self, period: impl Into<String>) {
        *self.period.write() = period.into();
    }
}

impl PeriodClock for FixedPeriodClock {
    fn current_period(&self) -> String {
        self.period.read().clone()
    }
}

/// 配额账本错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("quota storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<StoreError> for QuotaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => QuotaError::StorageUnavailable(msg),
        }
    }
}

/// `try_consume` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// 是否成功扣减一个单位
    pub consumed: bool,
    /// 操作后的已用次数
    pub used_count: u32,
    /// 本次操作所在的周期
    pub period_key: String,
}

/// 配额使用概览（/limits 接口）
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QuotaUsage {
    pub period_key: String,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub can_consume: bool,
}

/// 月度配额账本
pub struct QuotaLedger {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn PeriodClock>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn PeriodClock>) -> Self {
        Self { store, clock }
    }

    /// 使用系统 UTC 时钟
    pub fn with_system_clock(store: Arc<dyn AccountStore>) -> Self {
        Self::new(store, Arc::new(UtcMonthClock))
    }

    pub fn current_period(&self) -> String {
        self.clock.current_period()
    }

    /// 确保账号处于当前周期，必要时原子地归零并推进周期
    pub async fn ensure_current_period(&self, account_id: AccountId) -> Result<AccountQuotaState, QuotaError> {
        let (state, _) = self.update(account_id, |_| None).await?;
        Ok(state)
    }

    /// 原子地检查上限并扣减一个单位
    ///
    /// 达到上限时返回 `consumed = false`，不修改已用次数。
    pub async fn try_consume(&self, account_id: AccountId, ceiling: u32) -> Result<ConsumeOutcome, QuotaError> {
        let (state, consumed) = self
            .update(account_id, |base| {
                (base.used_count < ceiling).then(|| QuotaCounter::new(base.period_key.clone(), base.used_count + 1))
            })
            .await?;

        if consumed {
            metrics::record_quota_consumed();
            debug!(
                "🎫 配额扣减: account_id={}, used={}/{}, period={}",
                account_id, state.used_count, ceiling, state.period_key
            );
        } else {
            info!(
                "🚫 配额已用尽: account_id={}, used={}/{}, period={}",
                account_id, state.used_count, ceiling, state.period_key
            );
        }

        Ok(ConsumeOutcome {
            consumed,
            used_count: state.used_count,
            period_key: state.period_key,
        })
    }

    /// 退还一个单位（当前周期），下限为 0
    pub async fn release(&self, account_id: AccountId) -> Result<AccountQuotaState, QuotaError> {
        let period = self.current_period();
        self.release_for_period(account_id, &period).await
    }

    /// 退还在 `period_key` 周期扣减的一个单位
    ///
    /// 周期已切换时不做任何扣减：新周期的计数已经从 0 开始。
    pub async fn release_for_period(
        &self,
        account_id: AccountId,
        period_key: &str,
    ) -> Result<AccountQuotaState, QuotaError> {
        let (state, released) = self
            .update(account_id, |base| {
                (base.is_period(period_key) && base.used_count > 0)
                    .then(|| QuotaCounter::new(base.period_key.clone(), base.used_count - 1))
            })
            .await?;

        if released {
            metrics::record_quota_refunded();
            info!(
                "↩️ 配额已退还: account_id={}, used={}, period={}",
                account_id, state.used_count, state.period_key
            );
        } else {
            debug!(
                "配额退还为空操作: account_id={}, consumed_period={}, current={}",
                account_id, period_key, state.period_key
            );
        }
        Ok(state)
    }

    /// 管理操作：把当前周期的已用次数清零
    pub async fn reset(&self, account_id: AccountId) -> Result<AccountQuotaState, QuotaError> {
        let (state, _) = self
            .update(account_id, |base| Some(QuotaCounter::new(base.period_key.clone(), 0)))
            .await?;
        info!("🧹 配额已重置: account_id={}, period={}", account_id, state.period_key);
        Ok(state)
    }

    /// 当前周期的使用概览
    pub async fn usage(&self, account_id: AccountId, ceiling: u32) -> Result<QuotaUsage, QuotaError> {
        let state = self.ensure_current_period(account_id).await?;
        Ok(QuotaUsage {
            period_key: state.period_key,
            used: state.used_count,
            limit: ceiling,
            remaining: ceiling.saturating_sub(state.used_count),
            can_consume: state.used_count < ceiling,
        })
    }

    /// CAS 循环
    ///
    /// `mutate` 收到的是已按当前周期归一化的计数器，返回 `Some` 表示要写入的新值。
    /// 返回值中的 bool 表示 `mutate` 的修改是否生效。
    async fn update<F>(&self, account_id: AccountId, mut mutate: F) -> Result<(AccountQuotaState, bool), QuotaError>
    where
        F: FnMut(&QuotaCounter) -> Option<QuotaCounter>,
    {
        let period = self.clock.current_period();

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let mut record = self.load(account_id).await?;
            let stored = record.quota.clone();

            let base = if stored.is_period(&period) {
                stored.clone()
            } else {
                QuotaCounter::new(period.clone(), 0)
            };
            let target = mutate(&base);
            let applied = target.is_some();
            let desired = target.unwrap_or(base);

            if desired == stored {
                return Ok((AccountQuotaState::from_record(&record), applied));
            }

            if self.store.compare_and_set_quota(account_id, &stored, &desired).await? {
                if !stored.is_period(&period) {
                    info!(
                        "🔄 配额周期切换: account_id={}, {} -> {}",
                        account_id, stored.period_key, period
                    );
                }
                record.quota = desired;
                return Ok((AccountQuotaState::from_record(&record), applied));
            }

            debug!("配额 CAS 冲突，重试: account_id={}, attempt={}", account_id, attempt + 1);
            tokio::task::yield_now().await;
        }

        warn!("⚠️ 配额 CAS 重试次数耗尽: account_id={}", account_id);
        Err(QuotaError::StorageUnavailable(format!(
            "quota update for account {} did not converge",
            account_id
        )))
    }

    async fn load(&self, account_id: AccountId) -> Result<AccountRecord, QuotaError> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or(QuotaError::AccountNotFound(account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryAccountStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ledger_with(store: MemoryAccountStore, period: &str) -> (QuotaLedger, Arc<FixedPeriodClock>) {
        let clock = Arc::new(FixedPeriodClock::new(period));
        (QuotaLedger::new(Arc::new(store), clock.clone()), clock)
    }

    fn seeded_store(account_id: AccountId, period: &str, used: u32) -> MemoryAccountStore {
        let store = MemoryAccountStore::new();
        let mut record = AccountRecord::new(account_id, "free");
        record.quota = QuotaCounter::new(period, used);
        store.insert(record);
        store
    }

    /// 统计周期重置写入次数
    struct CountingStore {
        inner: MemoryAccountStore,
        resets: AtomicUsize,
    }

    #[async_trait]
    impl AccountStore for CountingStore {
        async fn find_account(&self, account_id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
            self.inner.find_account(account_id).await
        }

        async fn compare_and_set_quota(
            &self,
            account_id: AccountId,
            expected: &QuotaCounter,
            new: &QuotaCounter,
        ) -> Result<bool, StoreError> {
            let ok = self.inner.compare_and_set_quota(account_id, expected, new).await?;
            if ok && expected.period_key != new.period_key {
                self.resets.fetch_add(1, Ordering::SeqCst);
            }
            Ok(ok)
        }

        async fn upsert_account(&self, account_id: AccountId, plan_name: &str) -> Result<AccountRecord, StoreError> {
            self.inner.upsert_account(account_id, plan_name).await
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl AccountStore for UnavailableStore {
        async fn find_account(&self, _account_id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn compare_and_set_quota(
            &self,
            _account_id: AccountId,
            _expected: &QuotaCounter,
            _new: &QuotaCounter,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn upsert_account(&self, _account_id: AccountId, _plan_name: &str) -> Result<AccountRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_consume_until_ceiling() {
        let (ledger, _) = ledger_with(seeded_store(1, "2026-10", 0), "2026-10");

        let first = ledger.try_consume(1, 1).await.unwrap();
        assert!(first.consumed);
        assert_eq!(first.used_count, 1);

        let second = ledger.try_consume(1, 1).await.unwrap();
        assert!(!second.consumed);
        assert_eq!(second.used_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_never_exceeds_ceiling() {
        let (ledger, _) = ledger_with(seeded_store(1, "2026-10", 0), "2026-10");
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.try_consume(1, 10).await.unwrap().consumed }));
        }

        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(ledger.ensure_current_period(1).await.unwrap().used_count, 10);
    }

    #[tokio::test]
    async fn test_new_account_starts_in_current_period() {
        let store = MemoryAccountStore::new();
        store.upsert_account(5, "free").await.unwrap();
        let (ledger, _) = ledger_with(store, "2026-10");

        let state = ledger.ensure_current_period(5).await.unwrap();
        assert_eq!(state.period_key, "2026-10");
        assert_eq!(state.used_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_period_rollover_resets_exactly_once() {
        let store = CountingStore {
            inner: seeded_store(1, "2026-09", 3),
            resets: AtomicUsize::new(0),
        };
        let store = Arc::new(store);
        let clock = Arc::new(FixedPeriodClock::new("2026-10"));
        let ledger = Arc::new(QuotaLedger::new(store.clone(), clock));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.ensure_current_period(1).await.unwrap() }));
        }
        for h in handles {
            let state = h.await.unwrap();
            assert_eq!(state.period_key, "2026-10");
        }
        assert_eq!(store.resets.load(Ordering::SeqCst), 1);

        // 新周期内的扣减不会被后续读取再次清零
        assert!(ledger.try_consume(1, 3).await.unwrap().consumed);
        assert_eq!(ledger.ensure_current_period(1).await.unwrap().used_count, 1);
        assert_eq!(store.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_consume_after_rollover() {
        let (ledger, clock) = ledger_with(seeded_store(1, "2026-10", 3), "2026-10");
        assert!(!ledger.try_consume(1, 3).await.unwrap().consumed);

        clock.set("2026-11");
        let outcome = ledger.try_consume(1, 3).await.unwrap();
        assert!(outcome.consumed);
        assert_eq!(outcome.used_count, 1);
        assert_eq!(outcome.period_key, "2026-11");
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let (ledger, _) = ledger_with(seeded_store(1, "2026-10", 1), "2026-10");
        assert_eq!(ledger.release(1).await.unwrap().used_count, 0);
        assert_eq!(ledger.release(1).await.unwrap().used_count, 0);
    }

    #[tokio::test]
    async fn test_release_for_previous_period_is_noop() {
        let (ledger, clock) = ledger_with(seeded_store(1, "2026-10", 0), "2026-10");
        let outcome = ledger.try_consume(1, 5).await.unwrap();
        assert!(outcome.consumed);

        clock.set("2026-11");
        assert!(ledger.try_consume(1, 5).await.unwrap().consumed);

        // 上个月扣减的单位不能退到本月
        let state = ledger.release_for_period(1, &outcome.period_key).await.unwrap();
        assert_eq!(state.used_count, 1);
    }

    #[tokio::test]
    async fn test_reset_and_usage() {
        let (ledger, _) = ledger_with(seeded_store(1, "2026-10", 2), "2026-10");
        let usage = ledger.usage(1, 3).await.unwrap();
        assert_eq!(usage.remaining, 1);
        assert!(usage.can_consume);

        ledger.reset(1).await.unwrap();
        let usage = ledger.usage(1, 3).await.unwrap();
        assert_eq!(usage.used, 0);
        assert_eq!(usage.remaining, 3);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (ledger, _) = ledger_with(MemoryAccountStore::new(), "2026-10");
        assert_eq!(ledger.try_consume(42, 3).await, Err(QuotaError::AccountNotFound(42)));
    }

    #[tokio::test]
    async fn test_storage_unavailable_fails_closed() {
        let ledger = QuotaLedger::new(Arc::new(UnavailableStore), Arc::new(FixedPeriodClock::new("2026-10")));
        let err = ledger.try_consume(1, 3).await.unwrap_err();
        assert!(matches!(err, QuotaError::StorageUnavailable(_)));
    }
}
