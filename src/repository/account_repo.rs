//! 账号仓库 - PostgreSQL 实现
//!
//! compare-and-set 使用一条带条件的 UPDATE，依赖行级锁保证原子性。

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use super::{AccountStore, StoreError};
use crate::model::{AccountId, AccountRecord, QuotaCounter};

/// 账号仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: Arc<PgPool>,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: i64,
    plan_name: String,
    period_key: String,
    used_count: i32,
    created_at: i64,
}

impl From<AccountRow> for AccountRecord {
    fn from(r: AccountRow) -> Self {
        AccountRecord {
            account_id: r.account_id as u64,
            plan_name: r.plan_name,
            quota: QuotaCounter::new(r.period_key, r.used_count.max(0) as u32),
            created_at: r.created_at,
        }
    }
}

impl PgAccountRepository {
    /// 创建新的账号仓库
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountRepository {
    async fn find_account(&self, account_id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT account_id, plan_name, period_key, used_count, created_at
            FROM flashdeck_accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id as i64)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to query account: {}", e)))?;

        Ok(row.map(AccountRecord::from))
    }

    async fn compare_and_set_quota(
        &self,
        account_id: AccountId,
        expected: &QuotaCounter,
        new: &QuotaCounter,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flashdeck_accounts
            SET period_key = $4, used_count = $5, updated_at = $6
            WHERE account_id = $1 AND period_key = $2 AND used_count = $3
            "#,
        )
        .bind(account_id as i64)
        .bind(&expected.period_key)
        .bind(expected.used_count as i32)
        .bind(&new.period_key)
        .bind(new.used_count as i32)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to update quota: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_account(&self, account_id: AccountId, plan_name: &str) -> Result<AccountRecord, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO flashdeck_accounts (account_id, plan_name, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (account_id)
            DO UPDATE SET plan_name = EXCLUDED.plan_name, updated_at = EXCLUDED.updated_at
            RETURNING account_id, plan_name, period_key, used_count, created_at
            "#,
        )
        .bind(account_id as i64)
        .bind(plan_name)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to upsert account: {}", e)))?;

        Ok(row.into())
    }
}
