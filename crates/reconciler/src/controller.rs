//! Controller runtime loop.
//!
//! Workers pull keys from the [`WorkQueue`], reconcile them and settle each
//! item into one of four end states:
//!
//! ```text
//! reconcile -> Succeeded   (no error, no requeue; failures reset)
//!           -> Requeued    (no error, requeue; re-added after the delay)
//!           -> Failed      (error; re-added after per-key backoff)
//!           -> Cancelled   (shutdown; not a failure, not re-added)
//! ```
//!
//! On shutdown the queue stops handing out keys and in-flight reconciles get
//! the drain timeout to finish before they are aborted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kron_core::{ErrorKind, ObjectKey};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ControllerConfig;
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;
use crate::shutdown::ShutdownCoordinator;

/// How one reconcile of a queue item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Succeeded,
    Requeued(Duration),
    Failed { attempt: u32, retry_after: Duration },
    Cancelled,
}

/// Counters kept by the runtime loop.
#[derive(Debug, Default)]
pub struct ControllerStats {
    reconciles: AtomicU64,
    succeeded: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub reconciles: u64,
    pub succeeded: u64,
    pub requeued: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl ControllerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reconciles: self.reconciles.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Workers<R> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<ObjectKey>>,
    backoff: Backoff<ObjectKey>,
    stats: Arc<ControllerStats>,
}

impl<R: Reconcile> Workers<R> {
    async fn work(&self, worker: usize) {
        debug!(worker, "Worker started");
        while let Some(key) = self.queue.get().await {
            let state = self.process(&key).await;
            self.settle(&key, state).await;
            self.queue.done(&key).await;
        }
        debug!(worker, "Worker stopped");
    }

    /// Reconcile `key` once and classify the result.
    async fn process(&self, key: &ObjectKey) -> ItemState {
        ControllerStats::bump(&self.stats.reconciles);
        match self.reconciler.reconcile(key).await {
            Ok(outcome) => match outcome.requeue.delay() {
                None => ItemState::Succeeded,
                Some(delay) => ItemState::Requeued(delay),
            },
            Err(e) if e.kind() == ErrorKind::Cancelled => ItemState::Cancelled,
            Err(e) => {
                let (attempt, retry_after) = self.backoff.fail(key).await;
                warn!(
                    key = %key,
                    attempt,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    kind = %e.kind(),
                    error = %e,
                    "Reconcile failed"
                );
                ItemState::Failed {
                    attempt,
                    retry_after,
                }
            }
        }
    }

    async fn settle(&self, key: &ObjectKey, state: ItemState) {
        match state {
            ItemState::Succeeded => {
                ControllerStats::bump(&self.stats.succeeded);
                self.backoff.reset(key).await;
            }
            ItemState::Requeued(delay) => {
                ControllerStats::bump(&self.stats.requeued);
                self.requeue(key, delay).await;
            }
            ItemState::Failed { retry_after, .. } => {
                ControllerStats::bump(&self.stats.failed);
                self.requeue(key, retry_after).await;
            }
            ItemState::Cancelled => {
                ControllerStats::bump(&self.stats.cancelled);
                debug!(key = %key, "Reconcile cancelled by shutdown");
            }
        }
    }

    async fn requeue(&self, key: &ObjectKey, delay: Duration) {
        if delay.is_zero() {
            // Still processing: lands back in the queue on `done`
            self.queue.add(key.clone()).await;
        } else {
            self.queue.add_after(key.clone(), delay);
        }
    }
}

/// Runs a [`Reconcile`] implementation over a pool of workers until shutdown.
pub struct Controller<R> {
    workers: Arc<Workers<R>>,
    shutdown: Arc<ShutdownCoordinator>,
    worker_count: usize,
    drain_timeout: Duration,
}

impl<R: Reconcile + 'static> Controller<R> {
    pub fn new(
        reconciler: Arc<R>,
        queue: Arc<WorkQueue<ObjectKey>>,
        shutdown: Arc<ShutdownCoordinator>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            workers: Arc::new(Workers {
                reconciler,
                queue,
                backoff: Backoff::new(config.base_backoff(), config.max_backoff()),
                stats: Arc::new(ControllerStats::default()),
            }),
            shutdown,
            worker_count: config.workers.max(1),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Live counters.
    pub fn stats(&self) -> Arc<ControllerStats> {
        Arc::clone(&self.workers.stats)
    }

    /// Run until shutdown, then drain.
    pub async fn run(self) -> StatsSnapshot {
        let mut pool = JoinSet::new();
        for worker in 0..self.worker_count {
            let workers = Arc::clone(&self.workers);
            pool.spawn(async move { workers.work(worker).await });
        }
        info!(workers = self.worker_count, "Controller started");

        self.shutdown.wait().await;
        self.workers.queue.shut_down();
        let in_flight = self.workers.queue.in_flight().await;
        info!(
            in_flight,
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "Draining in-flight reconciles"
        );

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while pool.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            pool.abort_all();
            let mut aborted = 0u64;
            while let Some(result) = pool.join_next().await {
                if result.is_err_and(|e| e.is_cancelled()) {
                    aborted = aborted.saturating_add(1);
                }
            }
            self.workers
                .stats
                .cancelled
                .fetch_add(aborted, Ordering::Relaxed);
            warn!(aborted, "Drain timeout exceeded, aborted in-flight reconciles");
        }

        let stats = self.workers.stats.snapshot();
        info!(
            reconciles = stats.reconciles,
            succeeded = stats.succeeded,
            requeued = stats.requeued,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Controller stopped"
        );
        stats
    }
}
