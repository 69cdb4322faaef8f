//! 账号存储层
//!
//! 配额状态随账号记录持久化。`AccountStore` 只提供读取与 compare-and-set，
//! 周期重置、原子扣减等语义统一在 `admission::quota_ledger` 中实现。

use async_trait::async_trait;

use crate::model::{AccountId, AccountRecord, QuotaCounter};

pub mod account_repo;
pub mod memory_account_store;

pub use account_repo::PgAccountRepository;
pub use memory_account_store::MemoryAccountStore;

/// 存储层错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// 后端不可用（连接失败、超时、SQL 执行失败等）
    #[error("account store unavailable: {0}")]
    Unavailable(String),
}

/// 账号 / 配额存储
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 查找账号
    async fn find_account(&self, account_id: AccountId) -> Result<Option<AccountRecord>, StoreError>;

    /// 读取配额计数器，账号不存在时返回 None
    async fn read_quota(&self, account_id: AccountId) -> Result<Option<QuotaCounter>, StoreError> {
        Ok(self.find_account(account_id).await?.map(|r| r.quota))
    }

    /// 原子 compare-and-set：仅当当前计数器等于 `expected` 时写入 `new`
    ///
    /// 返回 false 表示期间有其他写入（或账号不存在），调用方应重新读取后重试。
    async fn compare_and_set_quota(
        &self,
        account_id: AccountId,
        expected: &QuotaCounter,
        new: &QuotaCounter,
    ) -> Result<bool, StoreError>;

    /// 创建账号或更新其套餐（不影响已有配额计数）
    async fn upsert_account(&self, account_id: AccountId, plan_name: &str) -> Result<AccountRecord, StoreError>;
}
