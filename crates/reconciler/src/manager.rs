//! Controller manager: owns the queue, the trigger channel and the shutdown
//! coordinator, and runs a reconciler over them.

use std::sync::Arc;

use kron_api::CronJob;
use kron_core::{ObjectKey, Resource, Result};
use kron_store::{ObjectStore, WatchStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ControllerConfig;
use crate::controller::{Controller, ControllerStats, StatsSnapshot};
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;
use crate::shutdown::ShutdownCoordinator;
use crate::triggers::{self, Route};

/// Wires watch triggers to a work queue and runs the controller loop.
pub struct Manager {
    cronjobs: Arc<dyn ObjectStore<CronJob>>,
    config: ControllerConfig,
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: Arc<ShutdownCoordinator>,
    trigger_tx: mpsc::Sender<ObjectKey>,
    trigger_rx: mpsc::Receiver<ObjectKey>,
    adapters: Vec<JoinHandle<()>>,
}

impl Manager {
    /// Create a manager. `cronjobs` is re-listed at startup and whenever a watch lags.
    pub fn new(cronjobs: Arc<dyn ObjectStore<CronJob>>, config: ControllerConfig) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_buffer.max(1));
        Self {
            cronjobs,
            config,
            queue: Arc::new(WorkQueue::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            trigger_tx,
            trigger_rx,
            adapters: Vec::new(),
        }
    }

    /// Use an externally owned shutdown coordinator. Call before [`Manager::watch`].
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue<ObjectKey>> {
        Arc::clone(&self.queue)
    }

    pub fn shutdown(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Enqueue `route(obj)` for every event on `watch`.
    ///
    /// Must be called inside a tokio runtime; the adapter starts right away
    /// and its keys wait in the trigger channel until [`Manager::run`].
    pub fn watch<K, F>(&mut self, watch: WatchStream<K>, route: F)
    where
        K: Resource,
        F: Fn(&K) -> Option<ObjectKey> + Send + Sync + 'static,
    {
        let route: Route<K> = Box::new(route);
        self.adapters.push(tokio::spawn(triggers::forward(
            watch,
            route,
            Arc::clone(&self.cronjobs),
            self.trigger_tx.clone(),
            Arc::clone(&self.shutdown),
        )));
    }

    /// Run `reconciler` until shutdown. Returns the final controller counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the initial re-list fails.
    pub async fn run<R: Reconcile + 'static>(self, reconciler: Arc<R>) -> Result<StatsSnapshot> {
        self.run_with_stats(reconciler, |_| {}).await
    }

    /// Like [`Manager::run`], handing the live counters to `observe` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the initial re-list fails.
    pub async fn run_with_stats<R, F>(self, reconciler: Arc<R>, observe: F) -> Result<StatsSnapshot>
    where
        R: Reconcile + 'static,
        F: FnOnce(Arc<ControllerStats>),
    {
        self.config.validate()?;
        let Self {
            cronjobs,
            config,
            queue,
            shutdown,
            trigger_tx,
            trigger_rx,
            adapters,
        } = self;

        let pump = tokio::spawn(triggers::pump(
            trigger_rx,
            Arc::clone(&queue),
            Arc::clone(&shutdown),
        ));

        let listed = match triggers::relist(cronjobs.as_ref(), &trigger_tx).await {
            Ok(listed) => listed,
            Err(e) => {
                adapters.iter().for_each(JoinHandle::abort);
                pump.abort();
                return Err(e);
            }
        };
        drop(trigger_tx);
        info!(cronjobs = listed, watches = adapters.len(), "Initial re-list queued");

        let controller = Controller::new(reconciler, queue, Arc::clone(&shutdown), &config);
        observe(controller.stats());
        let stats = controller.run().await;

        adapters.iter().for_each(JoinHandle::abort);
        pump.abort();
        Ok(stats)
    }
}
