//! Resource types managed by the kron controller.
//!
//! - [`CronJob`]: the user-authored desired state (schedule + command)
//! - [`Job`]: the one-shot execution resource the controller creates for it

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cronjob;
pub mod job;

pub use cronjob::{CronJob, CronJobSpec, CronJobStatus, JobReference};
pub use job::{Container, Job, JobOutcome, JobSpec, JobStatus, PodSpec, PodTemplateSpec, RestartPolicy};

use kron_core::{TypeDescriptor, TypeRegistry};

/// API group of [`CronJob`].
pub const CRONJOB_GROUP: &str = "batch.example.com";

/// API group of [`Job`].
pub const JOB_GROUP: &str = "batch";

/// Registry containing every type in this crate.
pub fn registry() -> TypeRegistry {
    TypeRegistry::builder()
        .register::<CronJob>(TypeDescriptor::new(CRONJOB_GROUP, "v1", "CronJob"))
        .register::<Job>(TypeDescriptor::new(JOB_GROUP, "v1", "Job"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_both_kinds() {
        let registry = registry();
        assert_eq!(
            registry.resolve::<CronJob>().map(TypeDescriptor::api_version),
            Some("batch.example.com/v1".to_string())
        );
        assert_eq!(
            registry.resolve::<Job>().map(|d| d.kind.clone()),
            Some("Job".to_string())
        );
    }
}
