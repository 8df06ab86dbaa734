//! Watch adapters feeding the work queue.
//!
//! Each adapter maps store events to queue keys and sends them over an
//! `mpsc` channel. A single pump task drains the channel into the queue.
//! When an adapter's watch lags it re-lists every owner instead, since the
//! dropped events cannot be recovered.

use std::sync::Arc;

use itertools::Itertools;
use kron_core::{Error, ObjectKey, Resource, Result};
use kron_store::{ObjectStore, WatchError, WatchStream};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::queue::WorkQueue;
use crate::shutdown::ShutdownCoordinator;

/// Maps a watched object to the key that should be reconciled.
pub type Route<K> = Box<dyn Fn(&K) -> Option<ObjectKey> + Send + Sync>;

/// Send the key of every object in `owners`. Returns how many were sent.
///
/// # Errors
///
/// Propagates list errors; [`Error::Cancelled`] if the pump has stopped.
pub async fn relist<O: Resource>(
    owners: &dyn ObjectStore<O>,
    triggers: &mpsc::Sender<ObjectKey>,
) -> Result<usize> {
    let keys = owners.list().await?.iter().map(Resource::key).collect_vec();
    for key in &keys {
        triggers
            .send(key.clone())
            .await
            .map_err(|_| Error::Cancelled)?;
    }
    debug!(kind = O::KIND, count = keys.len(), "Re-listed owners");
    Ok(keys.len())
}

/// Forward routed keys from `watch` until shutdown or the watch closes.
pub async fn forward<K: Resource, O: Resource>(
    mut watch: WatchStream<K>,
    route: Route<K>,
    owners: Arc<dyn ObjectStore<O>>,
    triggers: mpsc::Sender<ObjectKey>,
    shutdown: Arc<ShutdownCoordinator>,
) {
    let stopped = shutdown.wait();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            () = &mut stopped => {
                debug!(kind = K::KIND, "Watch adapter stopping");
                return;
            }
            event = watch.recv() => match event {
                Ok(event) => {
                    let Some(key) = route(event.object()) else {
                        continue;
                    };
                    trace!(kind = K::KIND, event = event.event_type(), key = %key, "Routing event");
                    if triggers.send(key).await.is_err() {
                        return;
                    }
                }
                Err(WatchError::Lagged(dropped)) => {
                    warn!(kind = K::KIND, dropped, "Watch lagged, re-listing owners");
                    if let Err(e) = relist(owners.as_ref(), &triggers).await {
                        warn!(kind = K::KIND, error = %e, "Re-list after lag failed");
                    }
                }
                Err(WatchError::Closed) => {
                    debug!(kind = K::KIND, "Watch closed");
                    return;
                }
            },
        }
    }
}

/// Drain `triggers` into `queue` until shutdown or every sender is gone.
pub async fn pump(
    mut triggers: mpsc::Receiver<ObjectKey>,
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: Arc<ShutdownCoordinator>,
) {
    let stopped = shutdown.wait();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            () = &mut stopped => break,
            key = triggers.recv() => match key {
                Some(key) => queue.add(key).await,
                None => break,
            },
        }
    }
    debug!("Trigger pump stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use kron_api::CronJob;
    use kron_store::InMemoryStore;

    use super::*;
    use crate::shutdown::ShutdownSignal;

    fn cronjob(name: &str) -> CronJob {
        CronJob::new("default", name, "*/5 * * * *", vec![])
    }

    #[tokio::test]
    async fn test_relist_sends_every_key() {
        let store = InMemoryStore::<CronJob>::new();
        store.create(cronjob("a")).await.unwrap();
        store.create(cronjob("b")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(relist::<CronJob>(&store, &tx).await.unwrap(), 2);
        assert_eq!(rx.recv().await, Some(ObjectKey::new("default", "a")));
        assert_eq!(rx.recv().await, Some(ObjectKey::new("default", "b")));
    }

    #[tokio::test]
    async fn test_forward_routes_until_shutdown() {
        let store = Arc::new(InMemoryStore::<CronJob>::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (tx, mut rx) = mpsc::channel(8);

        let route: Route<CronJob> = Box::new(|c: &CronJob| {
            (c.metadata.name != "skip").then(|| c.key())
        });
        let adapter = tokio::spawn(forward(
            store.watch(),
            route,
            store.clone() as Arc<dyn ObjectStore<CronJob>>,
            tx,
            Arc::clone(&shutdown),
        ));

        store.create(cronjob("skip")).await.unwrap();
        store.create(cronjob("a")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(ObjectKey::new("default", "a")));

        shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
        tokio::time::timeout(Duration::from_secs(1), adapter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_lagged_watch_relists() {
        let store = Arc::new(InMemoryStore::<CronJob>::with_watch_capacity(1));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (tx, mut rx) = mpsc::channel(16);

        let watch = store.watch();
        for name in ["a", "b", "c"] {
            store.create(cronjob(name)).await.unwrap();
        }

        let route: Route<CronJob> = Box::new(|c: &CronJob| Some(c.key()));
        tokio::spawn(forward(
            watch,
            route,
            store.clone() as Arc<dyn ObjectStore<CronJob>>,
            tx,
            Arc::clone(&shutdown),
        ));

        let mut seen = std::collections::HashSet::new();
        while seen.len() < 3 {
            let key = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.insert(key.name);
        }
        shutdown.initiate_shutdown(ShutdownSignal::Programmatic);
    }

    #[tokio::test]
    async fn test_pump_feeds_queue() {
        let queue = Arc::new(WorkQueue::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(pump(rx, Arc::clone(&queue), shutdown));

        let key = ObjectKey::new("default", "a");
        tx.send(key.clone()).await.unwrap();
        tx.send(key.clone()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some(key));
    }
}
