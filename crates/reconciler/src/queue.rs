//! De-duplicating work queue.
//!
//! A key is in at most one of two places at a time: waiting in the queue, or
//! being processed by a worker. Adding a key that is already waiting is a
//! no-op. Adding a key that is being processed marks it dirty, and `done`
//! puts it back in the queue, so one key never has two reconciles in flight.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::trace;

struct QueueState<T> {
    queue: VecDeque<T>,
    /// Keys that need processing: everything in `queue`, plus keys re-added
    /// while being processed.
    dirty: HashSet<T>,
    processing: HashSet<T>,
}

/// Coalescing work queue with delayed adds.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
    shutting_down: AtomicBool,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
            }),
            ready: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Queue `item`, merging with any pending entry for it.
    pub async fn add(&self, item: T) {
        if self.is_shutting_down() {
            return;
        }
        let mut state = self.state.lock().await;
        if !state.dirty.insert(item.clone()) {
            trace!(item = ?item, "Coalesced with pending entry");
            return;
        }
        if state.processing.contains(&item) {
            trace!(item = ?item, "Deferred until processing finishes");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.ready.notify_one();
    }

    /// Queue `item` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(item).await;
        });
    }

    /// Wait for the next item and mark it as processing.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if self.is_shutting_down() {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `item`. If it was re-added meanwhile, queue it again.
    pub async fn done(&self, item: &T) {
        let mut state = self.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Stop handing out items. Pending items are dropped.
    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Number of items waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    /// Number of items handed out and not yet done.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[tokio::test]
    async fn test_add_coalesces() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_add_during_processing_is_deferred() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        let item = queue.get().await.unwrap();

        queue.add("a").await;
        queue.add("a").await;
        assert!(queue.is_empty().await, "in-flight key must not be handed out twice");

        queue.done(&item).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a").await;
        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.add("late").await;

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some("late"));
    }

    #[tokio::test]
    async fn test_add_after_delays() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("later", Duration::from_millis(30));
        assert!(queue.is_empty().await);

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(got, Some("later"));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = Arc::new(WorkQueue::<&str>::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shut_down();

        for waiter in waiters {
            let got = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, None);
        }

        queue.add("ignored").await;
        assert!(queue.is_empty().await);
    }

    proptest! {
        #[test]
        fn pending_keys_are_unique(keys in proptest::collection::vec(0u8..8, 0..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let queue = WorkQueue::new();
                for key in &keys {
                    queue.add(*key).await;
                }

                let distinct: HashSet<u8> = keys.iter().copied().collect();
                assert_eq!(queue.len().await, distinct.len());

                let mut seen = HashSet::new();
                for _ in 0..distinct.len() {
                    let key = queue.get().await.unwrap();
                    assert!(seen.insert(key));
                }
                assert_eq!(seen, distinct);
            });
        }
    }
}
