//! LLM 调用槽位：限制进程内同时进行的外部生成服务调用数
//!
//! 与生成槽位相互独立；一个已准入的任务会发出多次调用，每次调用单独排队获取许可。

use std::future::Future;

use super::permit_pool::{PermitPool, PoolClosed, PoolPermit};

/// 单次 LLM 调用的许可
#[derive(Debug)]
pub struct LlmCallPermit(PoolPermit);

impl LlmCallPermit {
    pub fn release(self) {
        self.0.release();
    }
}

/// LLM 调用槽位
#[derive(Clone)]
pub struct LlmCallSemaphore {
    pool: PermitPool,
}

impl LlmCallSemaphore {
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            pool: PermitPool::new("llm_call", max_concurrent_calls),
        }
    }

    pub fn try_acquire(&self) -> Option<LlmCallPermit> {
        self.pool.try_acquire().map(LlmCallPermit)
    }

    pub async fn acquire(&self) -> Result<LlmCallPermit, PoolClosed> {
        self.pool.acquire().await.map(LlmCallPermit)
    }

    /// 在持有许可期间执行 `call`，无论 `call` 如何结束（包括被取消）都会归还许可
    pub async fn with_slot<F>(&self, call: F) -> Result<F::Output, PoolClosed>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(call.await)
    }

    pub fn available_count(&self) -> usize {
        self.pool.available_count()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn max_permits(&self) -> usize {
        self.pool.max_permits()
    }
}
