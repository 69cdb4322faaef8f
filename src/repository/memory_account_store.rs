//! 账号存储 - 进程内实现（DashMap）
//!
//! 单实例部署使用；每个 key 的 shard 写锁保证 compare-and-set 的原子性。

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::{AccountStore, StoreError};
use crate::model::{AccountId, AccountRecord, QuotaCounter};

/// 进程内账号存储
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<DashMap<AccountId, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入完整记录（启动时预置账号、测试构造状态）
    pub fn insert(&self, record: AccountRecord) {
        self.accounts.insert(record.account_id, record);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_account(&self, account_id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.accounts.get(&account_id).map(|r| r.value().clone()))
    }

    async fn compare_and_set_quota(
        &self,
        account_id: AccountId,
        expected: &QuotaCounter,
        new: &QuotaCounter,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if record.quota != *expected {
            return Ok(false);
        }
        record.quota = new.clone();
        Ok(true)
    }

    async fn upsert_account(&self, account_id: AccountId, plan_name: &str) -> Result<AccountRecord, StoreError> {
        let mut entry = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| AccountRecord::new(account_id, plan_name));
        entry.plan_name = plan_name.to_string();
        debug!("👤 账号已写入: account_id={}, plan={}", account_id, plan_name);
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_set_requires_expected_value() {
        let store = MemoryAccountStore::new();
        store.upsert_account(7, "free").await.unwrap();

        let fresh = QuotaCounter::never_used();
        let next = QuotaCounter::new("2026-10", 1);
        assert!(store.compare_and_set_quota(7, &fresh, &next).await.unwrap());

        // 旧值已变化，第二次 CAS 必须失败
        assert!(!store.compare_and_set_quota(7, &fresh, &next).await.unwrap());
        assert_eq!(store.read_quota(7).await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn test_compare_and_set_on_missing_account() {
        let store = MemoryAccountStore::new();
        let ok = store
            .compare_and_set_quota(1, &QuotaCounter::never_used(), &QuotaCounter::new("2026-10", 1))
            .await
            .unwrap();
        assert!(!ok);
        assert!(store.read_quota(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_quota() {
        let store = MemoryAccountStore::new();
        let mut record = AccountRecord::new(9, "free");
        record.quota = QuotaCounter::new("2026-10", 2);
        store.insert(record);

        let updated = store.upsert_account(9, "paid").await.unwrap();
        assert_eq!(updated.plan_name, "paid");
        assert_eq!(updated.quota.used_count, 2);
    }
}
