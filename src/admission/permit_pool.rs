//! 有界许可池
//!
//! 基于 `tokio::sync::Semaphore`：
//! - 等待者按到达顺序排队（公平、无饥饿）
//! - 释放时许可直接交给队首等待者，并发的 `try_acquire` 无法抢走
//! - 许可以 RAII 形式持有，drop 即释放，一次获取只会释放一次

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 许可池已关闭
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{pool} permit pool is closed")]
pub struct PoolClosed {
    pub pool: &'static str,
}

/// 有界许可池
#[derive(Clone)]
pub struct PermitPool {
    name: &'static str,
    sem: Arc<Semaphore>,
    max_permits: usize,
    /// try_acquire 失败计数
    rejected_count: Arc<AtomicU64>,
}

/// 池中的一个许可，drop 时归还
#[derive(Debug)]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    pool: &'static str,
}

impl PoolPermit {
    pub fn pool(&self) -> &'static str {
        self.pool
    }

    /// 显式归还（等价于 drop）
    pub fn release(self) {}
}

impl PermitPool {
    pub fn new(name: &'static str, max_permits: usize) -> Self {
        Self {
            name,
            sem: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            rejected_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 非阻塞获取；没有可用许可时返回 None 并自增 rejected 计数
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        match self.sem.clone().try_acquire_owned() {
            Ok(permit) => Some(self.wrap(permit)),
            Err(_) => {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 阻塞获取：排队直到有许可释放
    pub async fn acquire(&self) -> Result<PoolPermit, PoolClosed> {
        self.sem
            .clone()
            .acquire_owned()
            .await
            .map(|permit| self.wrap(permit))
            .map_err(|_| PoolClosed { pool: self.name })
    }

    /// 当前可用许可数（仅用于观测，不能作为准入依据）
    pub fn available_count(&self) -> usize {
        self.sem.available_permits()
    }

    /// 当前被持有的许可数
    pub fn in_flight(&self) -> usize {
        self.max_permits.saturating_sub(self.sem.available_permits())
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// 累计被拒绝的 try_acquire 次数
    pub fn rejected_total(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> PoolPermit {
        PoolPermit {
            _permit: permit,
            pool: self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_respects_bound() {
        let pool = PermitPool::new("test", 2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.rejected_total(), 1);
        assert_eq!(pool.in_flight(), 2);

        a.release();
        assert_eq!(pool.available_count(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_blocked_acquire_resumes_after_release() {
        let pool = PermitPool::new("test", 1);
        let held = pool.acquire().await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.unwrap() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let permit = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(permit.pool(), "test");
    }

    #[tokio::test]
    async fn test_released_permit_goes_to_waiter_not_try_acquire() {
        let pool = PermitPool::new("test", 1);
        let held = pool.try_acquire().unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        // 许可已交给排队者，不能被非阻塞获取抢走
        assert!(pool.try_acquire().is_none());
        let _permit = waiter.await.unwrap();
        assert_eq!(pool.available_count(), 0);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let pool = PermitPool::new("test", 1);
        let held = pool.try_acquire().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for i in 0..3 {
            let pool = pool.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let permit = pool.acquire().await.unwrap();
                tx.send(i).unwrap();
                drop(permit);
            }));
            // 保证排队顺序
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        let order: Vec<i32> = (0..3).map(|_| rx.try_recv().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
