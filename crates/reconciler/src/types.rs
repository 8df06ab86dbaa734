//! Core types for the reconciler.

use std::time::Duration;

/// When to reconcile the same key again, absent any new trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requeue {
    /// Wait for the next watch event.
    #[default]
    Never,
    /// Re-observe right away.
    Immediately,
    /// Re-check after a delay, e.g. the next schedule tick.
    After(Duration),
}

impl Requeue {
    /// The delay before the key is re-added, `None` for [`Requeue::Never`].
    pub const fn delay(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Immediately => Some(Duration::ZERO),
            Self::After(delay) => Some(delay),
        }
    }
}

/// What a reconcile decided to do, before doing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// No job exists and a run is due.
    Create,
    /// A job with the deterministic name exists but nothing controls it.
    Adopt,
    /// The owned job has finished and the next run is due.
    Replace,
    /// Nothing to do; re-check per the directive.
    Wait(Requeue),
}

/// The corrective action a reconcile took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileAction {
    /// Store already matches the desired state.
    NoOp,
    /// The owner is gone; nothing to converge.
    OwnerGone,
    /// Created the job.
    Created,
    /// Create raced with another reconcile; the job exists.
    AlreadyExisted,
    /// Attached a controller reference to an existing job.
    Adopted,
    /// Deleted a finished job so the next run can be created.
    Replaced,
}

impl ReconcileAction {
    /// Whether this action wrote to the job store.
    pub const fn mutated(self) -> bool {
        matches!(self, Self::Created | Self::Adopted | Self::Replaced)
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoOp => "no-op",
            Self::OwnerGone => "owner-gone",
            Self::Created => "created",
            Self::AlreadyExisted => "already-existed",
            Self::Adopted => "adopted",
            Self::Replaced => "replaced",
        };
        f.write_str(name)
    }
}

/// Result of one reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub requeue: Requeue,
    /// Whether the owner's status was written.
    pub status_updated: bool,
}

impl ReconcileOutcome {
    /// Outcome without a status write.
    pub const fn new(action: ReconcileAction, requeue: Requeue) -> Self {
        Self {
            action,
            requeue,
            status_updated: false,
        }
    }

    /// Whether the store already matched and nothing was written.
    pub const fn converged(&self) -> bool {
        !self.action.mutated() && !self.status_updated
    }
}
