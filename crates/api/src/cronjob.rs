//! The CronJob resource.

use chrono::{DateTime, Utc};
use kron_core::{Error, ObjectKey, ObjectMeta, Resource, Result, Uid};
use serde::{Deserialize, Serialize};

use crate::job::JobOutcome;

/// Desired state of a CronJob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobSpec {
    /// Cron expression, 5 (minute first) or 6 (second first) fields.
    pub schedule: String,
    /// Command run by the job container. Passed through as-is, even when empty.
    #[serde(default)]
    pub command: Vec<String>,
    /// Container image. The controller default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Suspended cronjobs get no new runs; an active run is left alone.
    #[serde(default)]
    pub suspend: bool,
}

/// Pointer to the job currently running for a CronJob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
}

/// Observed state, written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<JobReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<JobOutcome>,
}

/// A scheduled job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJob {
    pub metadata: ObjectMeta,
    pub spec: CronJobSpec,
    #[serde(default)]
    pub status: CronJobStatus,
}

impl CronJob {
    /// Create a CronJob in `namespace`.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: Vec<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: CronJobSpec {
                schedule: schedule.into(),
                command,
                ..CronJobSpec::default()
            },
            status: CronJobStatus::default(),
        }
    }

    /// Set the container image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = Some(image.into());
        self
    }

    /// Suspend or resume scheduling.
    #[must_use]
    pub const fn suspended(mut self, suspend: bool) -> Self {
        self.spec.suspend = suspend;
        self
    }

    /// Key of the single job this CronJob owns.
    pub fn job_key(&self) -> ObjectKey {
        job_key_for(&self.key())
    }

    /// Parse every CronJob in a multi-document YAML string.
    ///
    /// Documents without a namespace land in `default_namespace`.
    pub fn from_yaml_documents(content: &str, default_namespace: &str) -> Result<Vec<Self>> {
        serde_yaml::Deserializer::from_str(content)
            .map(|doc| {
                let mut cronjob = Self::deserialize(doc)
                    .map_err(|e| Error::serialization(format!("invalid CronJob manifest: {e}")))?;
                if cronjob.metadata.namespace.is_empty() {
                    cronjob.metadata.namespace = default_namespace.to_string();
                }
                if cronjob.metadata.name.is_empty() {
                    return Err(Error::invalid("CronJob manifest has no metadata.name"));
                }
                Ok(cronjob)
            })
            .collect()
    }
}

/// Deterministic job identity for an owner: `<owner-name>-job`, same namespace.
pub fn job_key_for(owner: &ObjectKey) -> ObjectKey {
    owner.sibling(format!("{}-job", owner.name))
}

impl Resource for CronJob {
    const KIND: &'static str = "CronJob";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_is_deterministic() {
        let cronjob = CronJob::new("batch", "job-a", "*/5 * * * *", vec![]);
        assert_eq!(cronjob.job_key(), ObjectKey::new("batch", "job-a-job"));
        assert_eq!(cronjob.job_key(), job_key_for(&cronjob.key()));
    }

    #[test]
    fn test_parse_manifests() {
        let yaml = r#"
metadata:
  name: job-a
spec:
  schedule: "*/5 * * * *"
  command: ["echo", "hi"]
---
metadata:
  name: job-b
  namespace: nightly
spec:
  schedule: "0 3 * * *"
  suspend: true
"#;
        let cronjobs = CronJob::from_yaml_documents(yaml, "default").unwrap();
        assert_eq!(cronjobs.len(), 2);
        assert_eq!(cronjobs[0].key(), ObjectKey::new("default", "job-a"));
        assert_eq!(cronjobs[0].spec.command, vec!["echo", "hi"]);
        assert_eq!(cronjobs[1].metadata.namespace, "nightly");
        assert!(cronjobs[1].spec.suspend);
        assert!(cronjobs[1].spec.command.is_empty());
    }

    #[test]
    fn test_parse_manifest_without_name() {
        let yaml = "metadata:\n  name: \"\"\nspec:\n  schedule: \"* * * * *\"\n";
        let result = CronJob::from_yaml_documents(yaml, "default");
        assert!(matches!(result, Err(Error::Invalid { .. })));
    }

    #[test]
    fn test_parse_manifest_rejects_garbage() {
        let result = CronJob::from_yaml_documents("spec: [1, 2", "default");
        assert!(matches!(result, Err(Error::Serialization { .. })));
    }
}
