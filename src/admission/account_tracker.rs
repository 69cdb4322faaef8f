//! 按账号的生成互斥：每个账号同一时间最多一个进行中的生成任务
//!
//! 第二个并发请求直接拒绝，不排队。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::model::AccountId;

/// 账号生成互斥表
#[derive(Debug, Default)]
pub struct AccountGenerationTracker {
    /// account_id -> lease_id
    active: Mutex<HashMap<AccountId, u64>>,
    next_lease_id: AtomicU64,
}

/// 账号槽位（RAII），drop 时释放
///
/// 只有 lease_id 仍然匹配时才会移除，过期的重复释放不会误删其他请求的槽位。
#[derive(Debug)]
pub struct AccountSlot {
    tracker: Arc<AccountGenerationTracker>,
    account_id: AccountId,
    lease_id: u64,
}

impl AccountSlot {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// 显式释放（等价于 drop）
    pub fn release(self) {}
}

impl Drop for AccountSlot {
    fn drop(&mut self) {
        self.tracker.release_lease(self.account_id, self.lease_id);
    }
}

impl AccountGenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 账号未占用时占用并返回 true
    pub fn try_acquire(&self, account_id: AccountId) -> bool {
        self.insert(account_id).is_some()
    }

    /// 释放账号（不存在时为空操作）
    pub fn release(&self, account_id: AccountId) {
        if self.active.lock().remove(&account_id).is_some() {
            debug!("🔓 账号生成槽位已释放: account_id={}", account_id);
        }
    }

    /// 占用账号并返回 RAII 槽位
    pub fn try_lease(self: &Arc<Self>, account_id: AccountId) -> Option<AccountSlot> {
        self.insert(account_id).map(|lease_id| AccountSlot {
            tracker: Arc::clone(self),
            account_id,
            lease_id,
        })
    }

    pub fn is_active(&self, account_id: AccountId) -> bool {
        self.active.lock().contains_key(&account_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn insert(&self, account_id: AccountId) -> Option<u64> {
        let mut active = self.active.lock();
        if active.contains_key(&account_id) {
            return None;
        }
        let lease_id = self.next_lease_id.fetch_add(1, Ordering::Relaxed);
        active.insert(account_id, lease_id);
        Some(lease_id)
    }

    fn release_lease(&self, account_id: AccountId, lease_id: u64) {
        let mut active = self.active.lock();
        if active.get(&account_id) == Some(&lease_id) {
            active.remove(&account_id);
            debug!("🔓 账号生成槽位已释放: account_id={}", account_id);
        }
    }
}
