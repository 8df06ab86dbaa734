//! Cascade deletion of owned objects.
//!
//! When an owner is deleted, every child whose controller reference carries
//! the owner's uid is deleted too. A lagged watch falls back to a full sweep
//! that removes children whose controlling owner no longer exists.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use kron_core::{OwnerReference, Resource, Result, ResultExt, Uid};
use tracing::{debug, info, warn};

use crate::store::ObjectStore;
use crate::watch::{WatchError, WatchEvent};

/// Deletes children of deleted owners.
pub struct OwnerCollector<O, C> {
    owners: Arc<dyn ObjectStore<O>>,
    children: Arc<dyn ObjectStore<C>>,
    _owner: PhantomData<fn() -> O>,
}

impl<O: Resource, C: Resource> OwnerCollector<O, C> {
    /// Create a collector for children of `owners` stored in `children`.
    pub fn new(owners: Arc<dyn ObjectStore<O>>, children: Arc<dyn ObjectStore<C>>) -> Self {
        Self {
            owners,
            children,
            _owner: PhantomData,
        }
    }

    /// Delete every child controlled by `owner_uid`. Returns how many were deleted.
    pub async fn collect(&self, owner_uid: Uid) -> Result<usize> {
        let mut deleted = 0usize;
        for child in self.children.list().await? {
            if controller_ref(&child).map(|r| r.uid) != Some(owner_uid) {
                continue;
            }
            let key = child.key();
            // Already gone is fine
            if self.children.delete(&key).await.found()?.is_some() {
                info!(kind = C::KIND, key = %key, owner_uid = %owner_uid, "Garbage collected child");
                deleted = deleted.saturating_add(1);
            }
        }
        Ok(deleted)
    }

    /// Delete every child whose controlling owner no longer exists.
    ///
    /// The owner list is only a first filter: it can be older than the child
    /// list, so each candidate's owner is fetched again before deleting.
    pub async fn sweep(&self) -> Result<usize> {
        let live: HashSet<Uid> = self
            .owners
            .list()
            .await?
            .iter()
            .filter_map(|owner| owner.meta().uid)
            .collect();

        let mut deleted = 0usize;
        for child in self.children.list().await? {
            let Some(reference) = controller_ref(&child) else {
                continue;
            };
            if live.contains(&reference.uid) || self.owner_alive(&child, reference).await? {
                continue;
            }
            let key = child.key();
            if self.children.delete(&key).await.found()?.is_some() {
                info!(
                    kind = C::KIND,
                    key = %key,
                    owner_uid = %reference.uid,
                    "Swept orphaned child"
                );
                deleted = deleted.saturating_add(1);
            }
        }
        Ok(deleted)
    }

    /// Whether the owner `reference` names still exists with the same uid.
    async fn owner_alive(&self, child: &C, reference: &OwnerReference) -> Result<bool> {
        let owner_key = child.key().sibling(reference.name.clone());
        let alive = self
            .owners
            .get(&owner_key)
            .await
            .found()?
            .is_some_and(|owner| owner.meta().uid == Some(reference.uid));
        if alive {
            debug!(
                kind = C::KIND,
                key = %child.key(),
                owner = %owner_key,
                "Owner appeared after listing, keeping child"
            );
        }
        Ok(alive)
    }

    /// Collect until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut watch = self.owners.watch();
        tokio::pin!(shutdown);

        if let Err(e) = self.sweep().await {
            warn!(error = %e, "Initial garbage collection sweep failed");
        }

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    debug!(kind = O::KIND, "Owner collector stopping");
                    return;
                }
                event = watch.recv() => match event {
                    Ok(WatchEvent::Deleted(owner)) => {
                        let Some(uid) = owner.meta().uid else {
                            continue;
                        };
                        if let Err(e) = self.collect(uid).await {
                            warn!(owner = %owner.key(), error = %e, "Garbage collection failed");
                        }
                    }
                    Ok(_) => {}
                    Err(WatchError::Lagged(n)) => {
                        warn!(dropped = n, "Owner watch lagged, sweeping");
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "Garbage collection sweep failed");
                        }
                    }
                    Err(WatchError::Closed) => {
                        debug!(kind = O::KIND, "Owner watch closed, collector stopping");
                        return;
                    }
                },
            }
        }
    }
}

fn controller_ref<C: Resource>(child: &C) -> Option<&OwnerReference> {
    child.meta().owner_references.iter().find(|r| r.controller)
}
