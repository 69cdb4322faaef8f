//! 账号与配额相关模型（与 repository、admission 共用，避免循环依赖）

use serde::{Deserialize, Serialize};

/// 账号 ID（由上游认证网关签发，这里只做透传）
pub type AccountId = u64;

/// 从未使用过配额的账号所携带的周期标记，首次读取时必然触发重置
pub const NEVER_USED_PERIOD: &str = "0000-00";

/// 配额计数器（CAS 的最小单位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    /// 计费周期（UTC，格式 YYYY-MM）
    pub period_key: String,
    /// 当前周期内已消耗次数
    pub used_count: u32,
}

impl QuotaCounter {
    pub fn new(period_key: impl Into<String>, used_count: u32) -> Self {
        Self {
            period_key: period_key.into(),
            used_count,
        }
    }

    /// 新账号的初始计数器
    pub fn never_used() -> Self {
        Self::new(NEVER_USED_PERIOD, 0)
    }

    pub fn is_period(&self, period_key: &str) -> bool {
        self.period_key == period_key
    }
}

impl Default for QuotaCounter {
    fn default() -> Self {
        Self::never_used()
    }
}

/// 账号记录（配额状态随账号持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: AccountId,
    /// 套餐名称（free / paid ...）
    pub plan_name: String,
    pub quota: QuotaCounter,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
}

impl AccountRecord {
    pub fn new(account_id: AccountId, plan_name: impl Into<String>) -> Self {
        Self {
            account_id,
            plan_name: plan_name.into(),
            quota: QuotaCounter::never_used(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 对外可见的账号配额状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQuotaState {
    pub account_id: AccountId,
    pub period_key: String,
    pub used_count: u32,
    pub plan_name: String,
}

impl AccountQuotaState {
    pub fn from_record(record: &AccountRecord) -> Self {
        Self {
            account_id: record.account_id,
            period_key: record.quota.period_key.clone(),
            used_count: record.quota.used_count,
            plan_name: record.plan_name.clone(),
        }
    }
}
