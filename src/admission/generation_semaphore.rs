//! 全局生成槽位：限制同时运行的生成任务数
//!
//! 准入流程只用 `try_acquire`，满载时立即拒绝而不是排队。

use super::permit_pool::{PermitPool, PoolClosed, PoolPermit};

/// 生成任务槽位的许可
#[derive(Debug)]
pub struct GenerationPermit(PoolPermit);

impl GenerationPermit {
    /// 归还槽位（等价于 drop）
    pub fn release(self) {
        self.0.release();
    }
}

/// 全局生成槽位
#[derive(Clone)]
pub struct GenerationSemaphore {
    pool: PermitPool,
}

impl GenerationSemaphore {
    pub fn new(max_concurrent_generations: usize) -> Self {
        Self {
            pool: PermitPool::new("generation", max_concurrent_generations),
        }
    }

    /// 非阻塞获取槽位
    pub fn try_acquire(&self) -> Option<GenerationPermit> {
        self.pool.try_acquire().map(GenerationPermit)
    }

    /// 阻塞获取槽位（FIFO 排队）
    pub async fn acquire(&self) -> Result<GenerationPermit, PoolClosed> {
        self.pool.acquire().await.map(GenerationPermit)
    }

    /// 当前可用槽位数（仅用于容量展示）
    pub fn available_count(&self) -> usize {
        self.pool.available_count()
    }

    pub fn is_slot_available(&self) -> bool {
        self.pool.available_count() > 0
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn max_permits(&self) -> usize {
        self.pool.max_permits()
    }

    pub fn rejected_total(&self) -> u64 {
        self.pool.rejected_total()
    }
}
