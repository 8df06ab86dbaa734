//! The Job resource: a one-shot execution created by the controller.

use chrono::{DateTime, Utc};
use kron_core::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

/// Restart policy of the pods a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Always,
    #[default]
    OnFailure,
    Never,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::OnFailure => write!(f, "OnFailure"),
            Self::Never => write!(f, "Never"),
        }
    }
}

/// A container in a pod template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    /// Labels stamped on every pod the job runs.
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub template: PodTemplateSpec,
}

/// Terminal result of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Observed state, written by whatever executes the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    /// Set once the job has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

/// A one-shot unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// `Some` once the job has finished.
    pub const fn outcome(&self) -> Option<JobOutcome> {
        self.status.outcome
    }

    /// Whether the job has finished, successfully or not.
    pub const fn is_finished(&self) -> bool {
        self.status.outcome.is_some()
    }

    /// Record a terminal outcome. Used by job runners and tests.
    pub fn finish(&mut self, outcome: JobOutcome, at: DateTime<Utc>) {
        match outcome {
            JobOutcome::Succeeded => self.status.succeeded = self.status.succeeded.saturating_add(1),
            JobOutcome::Failed => self.status.failed = self.status.failed.saturating_add(1),
        }
        self.status.completion_time = Some(at);
        self.status.outcome = Some(outcome);
    }

    /// The first container, if any.
    pub fn container(&self) -> Option<&Container> {
        self.spec.template.spec.containers.first()
    }
}

impl Resource for Job {
    const KIND: &'static str = "Job";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
