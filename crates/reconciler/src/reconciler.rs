//! CronJob reconciler.
//!
//! Each reconcile re-reads the CronJob and its job, decides one corrective
//! action with [`plan`], applies it, then writes the observed status back if
//! it changed. Running it again with nothing changed writes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kron_api::{
    Container, CronJob, CronJobStatus, Job, JobOutcome, JobReference, JobSpec, PodSpec,
    PodTemplateSpec, RestartPolicy,
};
use kron_core::{Error, ObjectKey, ObjectMeta, Resource, Result, ResultExt, TypeRegistry};
use kron_store::ObjectStore;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::manager::Manager;
use crate::owner::{controller_of, owner_key, set_controller_reference};
use crate::schedule::{Clock, SystemClock, next_run, until};
use crate::types::{Plan, ReconcileAction, ReconcileOutcome, Requeue};

/// Name of the single container in every job.
pub const CONTAINER_NAME: &str = "cronjob-container";

/// Label linking jobs and their pods back to the CronJob.
pub const OWNER_LABEL: &str = "cronjob-name";

/// Something the controller can drive toward a desired state, one key at a time.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Converge the object at `key`.
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome>;
}

/// Drives each CronJob's job toward its spec and schedule.
pub struct CronJobReconciler {
    cronjobs: Arc<dyn ObjectStore<CronJob>>,
    jobs: Arc<dyn ObjectStore<Job>>,
    registry: Arc<TypeRegistry>,
    clock: Arc<dyn Clock>,
    job_image: String,
}

impl CronJobReconciler {
    /// Create a reconciler reading the wall clock.
    pub fn new(
        cronjobs: Arc<dyn ObjectStore<CronJob>>,
        jobs: Arc<dyn ObjectStore<Job>>,
        registry: Arc<TypeRegistry>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            cronjobs,
            jobs,
            registry,
            clock: Arc::new(SystemClock),
            job_image: config.job_image.clone(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route CronJob events to their own key and Job events to their owner's key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedType`] if `CronJob` is not in the registry.
    pub fn register_triggers(&self, manager: &mut Manager) -> Result<()> {
        let owner_type = self.registry.require::<CronJob>()?.clone();
        manager.watch(self.cronjobs.watch(), |cronjob: &CronJob| {
            Some(cronjob.key())
        });
        manager.watch(self.jobs.watch(), move |job: &Job| owner_key(job, &owner_type));
        Ok(())
    }

    /// The job `cronjob` should have, before it is linked to its owner.
    pub fn desired_job(&self, cronjob: &CronJob, now: DateTime<Utc>) -> Job {
        let key = cronjob.job_key();
        let owner_name = cronjob.metadata.name.clone();

        let mut metadata =
            ObjectMeta::new(key.namespace, key.name).with_label(OWNER_LABEL, owner_name.clone());
        metadata.creation_timestamp = Some(now);

        let image = cronjob
            .spec
            .image
            .clone()
            .unwrap_or_else(|| self.job_image.clone());

        Job {
            metadata,
            spec: JobSpec {
                template: PodTemplateSpec {
                    labels: BTreeMap::from([(OWNER_LABEL.to_string(), owner_name)]),
                    spec: PodSpec {
                        containers: vec![Container {
                            name: CONTAINER_NAME.to_string(),
                            image,
                            command: cronjob.spec.command.clone(),
                        }],
                        restart_policy: RestartPolicy::OnFailure,
                    },
                },
            },
            status: Default::default(),
        }
    }

    async fn create(&self, desired: Job) -> Result<(ReconcileAction, Requeue, Option<Job>)> {
        let key = desired.key();
        match self.jobs.create(desired).await.ignore_already_exists()? {
            Some(created) => {
                info!(job = %key, "Created job");
                Ok((ReconcileAction::Created, Requeue::Immediately, Some(created)))
            }
            None => {
                let current = self.jobs.get(&key).await.found()?;
                Ok((ReconcileAction::AlreadyExisted, Requeue::Never, current))
            }
        }
    }

    async fn adopt(
        &self,
        cronjob: &CronJob,
        job: Job,
    ) -> Result<(ReconcileAction, Requeue, Option<Job>)> {
        let key = job.key();
        let linked = set_controller_reference(cronjob, job.clone(), &self.registry)?;
        match self.jobs.update(linked).await {
            Ok(adopted) => {
                info!(job = %key, owner = %cronjob.key(), "Adopted orphaned job");
                Ok((ReconcileAction::Adopted, Requeue::Immediately, Some(adopted)))
            }
            Err(e) if e.is_conflict() => {
                debug!(job = %key, error = %e, "Adoption raced with a job update");
                Ok((ReconcileAction::NoOp, Requeue::Immediately, Some(job)))
            }
            Err(e) => Err(e),
        }
    }

    async fn replace(&self, finished: Job) -> Result<(ReconcileAction, Requeue, Option<Job>)> {
        let key = finished.key();
        if self.jobs.delete(&key).await.found()?.is_some() {
            info!(job = %key, outcome = ?finished.outcome(), "Deleted finished job for next run");
        }
        Ok((ReconcileAction::Replaced, Requeue::Immediately, Some(finished)))
    }

    /// Write `status` if it differs from the stored one. Returns whether it
    /// was written, or `None` if the write lost a race.
    async fn sync_status(&self, cronjob: &CronJob, status: CronJobStatus) -> Result<Option<bool>> {
        if status == cronjob.status {
            return Ok(Some(false));
        }
        let mut updated = cronjob.clone();
        updated.status = status;
        match self.cronjobs.update(updated).await {
            Ok(_) => {
                debug!(key = %cronjob.key(), "Updated CronJob status");
                Ok(Some(true))
            }
            Err(e) if e.is_conflict() => {
                debug!(key = %cronjob.key(), error = %e, "Status write conflicted");
                Ok(None)
            }
            Err(e) if e.is_not_found() => Ok(Some(false)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reconcile for CronJobReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let Some(cronjob) = self.cronjobs.get(key).await.found()? else {
            debug!(key = %key, "CronJob is gone, nothing to reconcile");
            return Ok(ReconcileOutcome::new(ReconcileAction::OwnerGone, Requeue::Never));
        };

        let now = self.clock.now();
        let desired =
            set_controller_reference(&cronjob, self.desired_job(&cronjob, now), &self.registry)?;
        let existing = self.jobs.get(&cronjob.job_key()).await.found()?;

        let (action, requeue, observed) = match (plan(&cronjob, existing.as_ref(), now)?, existing) {
            (Plan::Create, _) => self.create(desired).await?,
            (Plan::Adopt, Some(job)) => self.adopt(&cronjob, job).await?,
            (Plan::Replace, Some(job)) => self.replace(job).await?,
            (Plan::Wait(requeue), existing) => (ReconcileAction::NoOp, requeue, existing),
            (Plan::Adopt | Plan::Replace, None) => (ReconcileAction::NoOp, Requeue::Never, None),
        };

        let status = observed_status(&cronjob.status, observed.as_ref());
        let mut outcome = ReconcileOutcome::new(action, requeue);
        match self.sync_status(&cronjob, status).await? {
            Some(written) => outcome.status_updated = written,
            None => outcome.requeue = Requeue::Immediately,
        }

        if outcome.converged() {
            debug!(key = %key, requeue = ?outcome.requeue, "CronJob converged");
        } else {
            info!(
                key = %key,
                action = %outcome.action,
                status_updated = outcome.status_updated,
                requeue = ?outcome.requeue,
                "Reconciled CronJob"
            );
        }
        Ok(outcome)
    }
}

/// Decide what to do about `cronjob`, given the job found under its deterministic name.
///
/// # Errors
///
/// Returns [`Error::Invalid`] if the job is controlled by another object or
/// the schedule does not parse.
pub fn plan(cronjob: &CronJob, existing: Option<&Job>, now: DateTime<Utc>) -> Result<Plan> {
    let Some(job) = existing else {
        return due(cronjob, now, Plan::Create);
    };

    match controller_of(job) {
        None => Ok(Plan::Adopt),
        Some(reference) if Some(reference.uid) != cronjob.metadata.uid => Err(Error::invalid(format!(
            "job '{}' is controlled by {} '{}' ({}), not '{}'",
            job.key(),
            reference.kind,
            reference.name,
            reference.uid,
            cronjob.key()
        ))),
        Some(_) if !job.is_finished() => Ok(Plan::Wait(Requeue::Never)),
        Some(_) => due(cronjob, now, Plan::Replace),
    }
}

/// `when_due` if a run is due now, otherwise wait for the next tick.
fn due(cronjob: &CronJob, now: DateTime<Utc>, when_due: Plan) -> Result<Plan> {
    if cronjob.spec.suspend {
        return Ok(Plan::Wait(Requeue::Never));
    }
    let next = next_run(&cronjob.spec.schedule, cronjob.status.last_schedule_time, now)?;
    Ok(match next {
        None => Plan::Wait(Requeue::Never),
        Some(at) if at <= now => when_due,
        Some(at) => Plan::Wait(Requeue::After(until(at, now))),
    })
}

/// The status `current` should have after observing `job`.
pub fn observed_status(current: &CronJobStatus, job: Option<&Job>) -> CronJobStatus {
    let mut status = current.clone();
    let Some(job) = job else {
        status.active = None;
        return status;
    };

    status.last_schedule_time = status
        .last_schedule_time
        .max(job.metadata.creation_timestamp);

    match job.outcome() {
        None => {
            status.active = Some(JobReference {
                name: job.metadata.name.clone(),
                uid: job.metadata.uid,
            });
        }
        Some(outcome) => {
            status.active = None;
            status.last_outcome = Some(outcome);
            if outcome == JobOutcome::Succeeded {
                status.last_successful_time =
                    job.status.completion_time.or(status.last_successful_time);
            }
        }
    }
    status
}
