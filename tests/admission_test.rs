//! 准入控制并发场景测试
//!
//! 覆盖配额原子扣减、跨月重置、全局槽位上限、同账号互斥以及租约释放。

use bytes::Bytes;
use flashdeck::admission::{
    AccountGenerationTracker, AdmissionController, AdmissionRejection, AdmissionRequest, FixedPeriodClock,
    GenerationSemaphore, PlanResolver, QuotaLedger,
};
use flashdeck::infra::UploadStore;
use flashdeck::model::AccountRecord;
use flashdeck::repository::{AccountStore, MemoryAccountStore};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    store: Arc<MemoryAccountStore>,
    clock: Arc<FixedPeriodClock>,
    ledger: Arc<QuotaLedger>,
}

impl Fixture {
    fn new(accounts: &[(u64, &str)]) -> Self {
        let store = Arc::new(MemoryAccountStore::new());
        for (id, plan) in accounts {
            store.insert(AccountRecord::new(*id, *plan));
        }
        let clock = Arc::new(FixedPeriodClock::new("2026-10"));
        let ledger = Arc::new(QuotaLedger::new(store.clone() as Arc<dyn AccountStore>, clock.clone()));
        Self { store, clock, ledger }
    }

    fn controller(&self, max_generations: usize) -> AdmissionController {
        AdmissionController::new(
            self.store.clone(),
            self.ledger.clone(),
            Arc::new(PlanResolver::builtin()),
            GenerationSemaphore::new(max_generations),
            Arc::new(AccountGenerationTracker::new()),
            UploadStore::memory().unwrap(),
        )
        .with_retry_after(Duration::from_secs(60))
    }
}

fn request(account_id: u64) -> AdmissionRequest {
    AdmissionRequest::new(account_id).with_document("notes.txt", Bytes::from_static(b"some text"))
}

#[tokio::test]
async fn test_ceiling_one_consumes_once() {
    let fx = Fixture::new(&[(1, "free")]);

    let first = fx.ledger.try_consume(1, 1).await.unwrap();
    let second = fx.ledger.try_consume(1, 1).await.unwrap();

    assert!(first.consumed);
    assert_eq!(first.used_count, 1);
    assert!(!second.consumed);
    assert_eq!(second.used_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumes_never_exceed_ceiling() {
    let fx = Fixture::new(&[(1, "paid")]);
    let ceiling = 10;

    let tasks = (0..64).map(|_| {
        let ledger = fx.ledger.clone();
        tokio::spawn(async move { ledger.try_consume(1, ceiling).await })
    });
    let results = join_all(tasks).await;

    let consumed = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|o| o.consumed)
        .count();
    assert_eq!(consumed, ceiling as usize);
    assert_eq!(fx.ledger.usage(1, ceiling).await.unwrap().used, ceiling);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_period_rollover_resets_exactly_once() {
    let fx = Fixture::new(&[(1, "paid")]);
    fx.clock.set("2026-09");
    for _ in 0..3 {
        assert!(fx.ledger.try_consume(1, 50).await.unwrap().consumed);
    }

    fx.clock.set("2026-10");
    let tasks = (0..16).map(|i| {
        let ledger = fx.ledger.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.try_consume(1, 50).await.map(|o| o.consumed)
            } else {
                ledger.ensure_current_period(1).await.map(|_| false)
            }
        })
    });
    let consumed = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap().as_ref().unwrap())
        .count();

    // 新周期的计数只包含新周期内的扣减，重置不会在扣减之后再次发生
    let usage = fx.ledger.usage(1, 50).await.unwrap();
    assert_eq!(consumed, 8);
    assert_eq!(usage.period_key, "2026-10");
    assert_eq!(usage.used, 8);
}

#[tokio::test]
async fn test_refund_after_rollover_does_not_touch_new_period() {
    let fx = Fixture::new(&[(1, "paid")]);
    fx.clock.set("2026-09");
    let consumed = fx.ledger.try_consume(1, 50).await.unwrap();

    fx.clock.set("2026-10");
    fx.ledger.try_consume(1, 50).await.unwrap();
    let state = fx.ledger.release_for_period(1, &consumed.period_key).await.unwrap();

    assert_eq!(state.period_key, "2026-10");
    assert_eq!(state.used_count, 1);
}

#[tokio::test]
async fn test_global_bound_admits_two_of_three() {
    let fx = Fixture::new(&[(1, "paid"), (2, "paid"), (3, "paid")]);
    let controller = fx.controller(2);

    let results = join_all((1..=3).map(|id| controller.check_and_reserve(request(id)))).await;

    let mut leases = Vec::new();
    let mut rejected = Vec::new();
    for (idx, result) in results.into_iter().enumerate() {
        match result {
            Ok(lease) => leases.push(lease),
            Err(e) => rejected.push((idx as u64 + 1, e)),
        }
    }
    assert_eq!(leases.len(), 2);
    assert_eq!(rejected.len(), 1);

    let (rejected_id, rejection) = &rejected[0];
    assert_eq!(
        *rejection,
        AdmissionRejection::GlobalCapacitySaturated {
            retry_after: Duration::from_secs(60)
        }
    );
    // 被拒绝的请求已扣减的配额被撤销
    assert_eq!(fx.ledger.usage(*rejected_id, 50).await.unwrap().used, 0);
    assert!(!controller.tracker().is_active(*rejected_id));
    assert_eq!(controller.generation().in_flight(), 2);

    for mut lease in leases {
        lease.finish(3).await;
    }
    assert_eq!(controller.generation().in_flight(), 0);
    assert_eq!(controller.tracker().active_count(), 0);
}

#[tokio::test]
async fn test_same_account_is_serialized() {
    let fx = Fixture::new(&[(1, "paid")]);
    let controller = fx.controller(2);

    let (a, b) = tokio::join!(
        controller.check_and_reserve(request(1)),
        controller.check_and_reserve(request(1))
    );

    let (mut lease, rejection) = match (a, b) {
        (Ok(lease), Err(e)) | (Err(e), Ok(lease)) => (lease, e),
        other => panic!("expected exactly one admission, got {:?}", other.0.is_ok()),
    };
    assert!(matches!(rejection, AdmissionRejection::AccountBusy { .. }));
    assert_eq!(rejection.retry_after(), Some(Duration::from_secs(60)));
    // 只保留成功请求的那一次扣减，全局槽位也已归还
    assert_eq!(fx.ledger.usage(1, 50).await.unwrap().used, 1);
    assert_eq!(controller.generation().in_flight(), 1);

    lease.finish(5).await;
    assert!(controller.check_and_reserve(request(1)).await.is_ok());
}

#[tokio::test]
async fn test_blocking_acquire_resumes_after_release() {
    let generation = Arc::new(GenerationSemaphore::new(1));
    let held = generation.try_acquire().unwrap();

    let waiter = {
        let generation = generation.clone();
        tokio::spawn(async move { generation.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    held.release();
    let permit = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resume")
        .unwrap()
        .unwrap();
    assert_eq!(generation.in_flight(), 1);
    drop(permit);
    assert_eq!(generation.available_count(), 1);
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let generation = Arc::new(GenerationSemaphore::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = generation.try_acquire().unwrap();

    let mut waiters = Vec::new();
    for id in 1..=3 {
        let generation = generation.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            let permit = generation.acquire().await.unwrap();
            order.lock().push(id);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(permit);
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(held);
    for waiter in join_all(waiters).await {
        waiter.unwrap();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let fx = Fixture::new(&[(1, "paid")]);
    let controller = fx.controller(2);

    let mut lease = controller.check_and_reserve(request(1)).await.unwrap();
    lease.release_all(true).await;
    lease.release_all(true).await;
    lease.finish(0).await;

    assert!(lease.is_released());
    assert_eq!(fx.ledger.usage(1, 50).await.unwrap().used, 0);
    assert_eq!(controller.generation().available_count(), 2);
    assert_eq!(controller.tracker().active_count(), 0);
}

#[tokio::test]
async fn test_cancelled_task_releases_everything() {
    let fx = Fixture::new(&[(1, "paid")]);
    let controller = Arc::new(fx.controller(1));

    let lease = controller.check_and_reserve(request(1)).await.unwrap();
    let upload = lease.upload().cloned().unwrap();

    // 模拟客户端断开：持有租约的任务被中止
    let task = tokio::spawn(async move {
        let _lease = lease;
        std::future::pending::<()>().await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(controller.generation().available_count(), 1);
    assert!(!controller.tracker().is_active(1));

    // 配额退还与上传清理在后台完成
    for _ in 0..50 {
        let used = fx.ledger.usage(1, 50).await.unwrap().used;
        if used == 0 && !controller.uploads().exists(&upload).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("lease resources were not released after cancellation");
}

#[tokio::test]
async fn test_quota_exceeded_leaves_no_residue() {
    let fx = Fixture::new(&[(1, "free")]);
    let controller = fx.controller(2);

    for _ in 0..3 {
        let mut lease = controller.check_and_reserve(request(1)).await.unwrap();
        lease.finish(5).await;
    }
    let rejection = controller.check_and_reserve(request(1)).await.unwrap_err();

    assert_eq!(
        rejection,
        AdmissionRejection::QuotaExceeded {
            plan: "free".to_string(),
            limit: 3,
            used: 3
        }
    );
    assert_eq!(controller.generation().in_flight(), 0);
    assert_eq!(controller.tracker().active_count(), 0);
}
