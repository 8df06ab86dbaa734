//! Runtime loop: backoff, requeue, cancellation and drain.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kron_core::{Error, ObjectKey, Result};
use kron_reconciler::{
    Controller, ControllerConfig, ControllerStats, Reconcile, ReconcileAction, ReconcileOutcome,
    Requeue, ShutdownCoordinator, ShutdownSignal, StatsSnapshot, WorkQueue,
};
use tokio::sync::Mutex;

/// Replays a fixed list of results, then succeeds forever.
struct Scripted {
    script: Mutex<VecDeque<Result<ReconcileOutcome>>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(script: Vec<Result<ReconcileOutcome>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconcile for Scripted {
    async fn reconcile(&self, _key: &ObjectKey) -> Result<ReconcileOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(idle()))
    }
}

struct Harness {
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: Arc<ShutdownCoordinator>,
    stats: Arc<ControllerStats>,
    handle: tokio::task::JoinHandle<StatsSnapshot>,
}

impl Harness {
    fn start<R: Reconcile + 'static>(reconciler: Arc<R>, config: &ControllerConfig) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let controller =
            Controller::new(reconciler, Arc::clone(&queue), Arc::clone(&shutdown), config);
        let stats = controller.stats();
        let handle = tokio::spawn(controller.run());
        Self {
            queue,
            shutdown,
            stats,
            handle,
        }
    }

    async fn stop(self) -> StatsSnapshot {
        self.shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

fn idle() -> ReconcileOutcome {
    ReconcileOutcome::new(ReconcileAction::NoOp, Requeue::Never)
}

fn transient() -> Result<ReconcileOutcome> {
    Err(Error::transient("get", "connection reset"))
}

#[tokio::test]
async fn test_failures_back_off_then_succeed() {
    let reconciler = Scripted::new(vec![transient(), transient(), transient()]);
    let harness = Harness::start(Arc::clone(&reconciler), &ControllerConfig::for_testing());

    harness.queue.add(key("a")).await;
    eventually(|| harness.stats.snapshot().succeeded == 1).await;

    let stats = harness.stop().await;
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.requeued, 0);
    assert_eq!(reconciler.calls(), 4);
}

#[tokio::test]
async fn test_requeue_is_not_a_failure() {
    let reconciler = Scripted::new(vec![
        Ok(ReconcileOutcome::new(
            ReconcileAction::Created,
            Requeue::Immediately,
        )),
        Ok(ReconcileOutcome::new(
            ReconcileAction::NoOp,
            Requeue::After(Duration::from_millis(20)),
        )),
    ]);
    let harness = Harness::start(Arc::clone(&reconciler), &ControllerConfig::for_testing());

    harness.queue.add(key("a")).await;
    eventually(|| harness.stats.snapshot().succeeded == 1).await;

    let stats = harness.stop().await;
    assert_eq!(stats.requeued, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(reconciler.calls(), 3);
}

#[tokio::test]
async fn test_cancelled_reconcile_is_not_retried() {
    let reconciler = Scripted::new(vec![Err(Error::Cancelled)]);
    let harness = Harness::start(Arc::clone(&reconciler), &ControllerConfig::for_testing());

    harness.queue.add(key("a")).await;
    eventually(|| harness.stats.snapshot().cancelled == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = harness.stop().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(reconciler.calls(), 1);
}

#[tokio::test]
async fn test_backoff_is_capped() {
    // Fail forever: with a 50ms cap, retries keep coming
    let reconciler = Scripted::new((0..1000).map(|_| transient()).collect());
    let harness = Harness::start(Arc::clone(&reconciler), &ControllerConfig::for_testing());

    harness.queue.add(key("a")).await;
    eventually(|| reconciler.calls() >= 10).await;

    let stats = harness.stop().await;
    assert!(stats.failed >= 10);
    assert_eq!(stats.succeeded, 0);
}

/// Records how many reconciles of one key overlap.
struct Overlap {
    active: Mutex<HashMap<ObjectKey, usize>>,
    max_overlap: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl Reconcile for Overlap {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut active = self.active.lock().await;
            let count = active.entry(key.clone()).or_insert(0);
            *count += 1;
            self.max_overlap.fetch_max(*count, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        *self.active.lock().await.entry(key.clone()).or_insert(1) -= 1;
        Ok(idle())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_reconcile_per_key_at_a_time() {
    let reconciler = Arc::new(Overlap {
        active: Mutex::new(HashMap::new()),
        max_overlap: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let config = ControllerConfig::for_testing().workers(4);
    let harness = Harness::start(Arc::clone(&reconciler), &config);

    for _ in 0..20 {
        harness.queue.add(key("a")).await;
        harness.queue.add(key("b")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    eventually(|| reconciler.calls.load(Ordering::SeqCst) >= 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.stop().await;
    assert_eq!(reconciler.max_overlap.load(Ordering::SeqCst), 1);
    // Coalescing: far fewer reconciles than adds
    assert!(reconciler.calls.load(Ordering::SeqCst) < 40);
}

/// Never finishes.
struct Stuck {
    started: AtomicUsize,
}

#[async_trait]
impl Reconcile for Stuck {
    async fn reconcile(&self, _key: &ObjectKey) -> Result<ReconcileOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(idle())
    }
}

#[tokio::test]
async fn test_drain_timeout_aborts_in_flight() {
    let reconciler = Arc::new(Stuck {
        started: AtomicUsize::new(0),
    });
    let harness = Harness::start(Arc::clone(&reconciler), &ControllerConfig::for_testing());

    harness.queue.add(key("a")).await;
    eventually(|| reconciler.started.load(Ordering::SeqCst) == 1).await;

    let stats = harness.stop().await;
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.failed, 0);
}
