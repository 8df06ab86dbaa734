//! Level-triggered reconciliation of CronJobs into Jobs.
//!
//! The controller keeps one [`Job`](kron_api::Job) per
//! [`CronJob`](kron_api::CronJob), named `<cronjob>-job`, and re-drives it
//! whenever either object changes:
//!
//! - **Triggers**: store watches feed a coalescing [`WorkQueue`]; job events
//!   are routed to the owning CronJob's key through its controller reference
//! - **Reconcile**: [`CronJobReconciler`] re-reads both objects and takes at
//!   most one corrective action: create, adopt or replace the job
//! - **Runtime loop**: [`Controller`] settles each reconcile into success,
//!   requeue, backoff retry or cancellation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kron_reconciler::{ControllerConfig, CronJobReconciler, Manager};
//! use kron_store::InMemoryStore;
//!
//! let config = ControllerConfig::default();
//! let cronjobs = Arc::new(InMemoryStore::new());
//! let jobs = Arc::new(InMemoryStore::new());
//! let registry = Arc::new(kron_api::registry());
//!
//! let reconciler = Arc::new(CronJobReconciler::new(cronjobs.clone(), jobs, registry, &config));
//! let mut manager = Manager::new(cronjobs, config);
//! reconciler.register_triggers(&mut manager)?;
//! let stats = manager.run(reconciler).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod config;
pub mod controller;
pub mod manager;
pub mod owner;
pub mod queue;
pub mod reconciler;
pub mod schedule;
pub mod shutdown;
pub mod triggers;
pub mod types;

pub use kron_core::{Error, Result};

pub use backoff::{Backoff, calculate_backoff};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerStats, ItemState, StatsSnapshot};
pub use manager::Manager;
pub use owner::{controller_of, owner_key, set_controller_reference};
pub use queue::WorkQueue;
pub use reconciler::{CONTAINER_NAME, CronJobReconciler, OWNER_LABEL, Reconcile, plan};
pub use schedule::{Clock, ManualClock, SystemClock, next_run};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, install_signal_handlers};
pub use types::{Plan, ReconcileAction, ReconcileOutcome, Requeue};
