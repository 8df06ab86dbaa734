//! Object stores for kron resources.
//!
//! - **Store trait**: [`ObjectStore`] with atomic create and compare-and-swap update
//! - **In-memory store**: [`InMemoryStore`], a complete store for tests and the demo binary
//! - **Watch**: every write is broadcast as a [`WatchEvent`]
//! - **Garbage collection**: [`OwnerCollector`] deletes children of deleted owners
//!
//! # Example
//!
//! ```ignore
//! use kron_api::CronJob;
//! use kron_store::{InMemoryStore, ObjectStore, WatchEvent};
//!
//! let store = InMemoryStore::<CronJob>::new();
//! let mut watch = store.watch();
//!
//! store.create(CronJob::new("default", "job-a", "*/5 * * * *", vec![])).await?;
//!
//! if let Ok(WatchEvent::Added(cronjob)) = watch.recv().await {
//!     println!("created {}", cronjob.metadata.name);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod gc;
pub mod store;
pub mod watch;

pub use gc::OwnerCollector;
pub use store::{InMemoryStore, ObjectStore, TracingStore};
pub use watch::{WatchError, WatchEvent, WatchStream};
