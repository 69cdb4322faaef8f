//! 准入控制
//!
//! 四个共享资源池：按账号的月度配额账本、全局生成槽位、按账号的生成互斥、
//! LLM 调用槽位。每个池内部自带同步，调用方无需额外加锁。
//! 获取顺序固定为 配额 -> 全局槽位 -> 账号槽位；LLM 调用槽位按次独立获取。

pub mod account_tracker;
pub mod generation_semaphore;
pub mod lease;
pub mod llm_semaphore;
pub mod permit_pool;
pub mod pipeline;
pub mod plan_resolver;
pub mod quota_ledger;

pub use account_tracker::{AccountGenerationTracker, AccountSlot};
pub use generation_semaphore::{GenerationPermit, GenerationSemaphore};
pub use lease::{
    Compensation, GenerationLease, LeaseSettlement, QuotaRefundPolicy, QuotaReservation, ReleaseHandles,
};
pub use llm_semaphore::{LlmCallPermit, LlmCallSemaphore};
pub use permit_pool::{PermitPool, PoolClosed, PoolPermit};
pub use pipeline::{AccountLimits, AdmissionController, AdmissionRejection, AdmissionRequest, IncomingDocument};
pub use plan_resolver::{PlanError, PlanResolver};
pub use quota_ledger::{
    ConsumeOutcome, FixedPeriodClock, PeriodClock, QuotaError, QuotaLedger, QuotaUsage, UtcMonthClock,
};
