//! Owner links between controlling objects and the children they create.
//!
//! A child carries at most one controller reference. It names the owner's
//! api version and kind (resolved through the [`TypeRegistry`]), its name and
//! its uid. The garbage collector deletes children of deleted owners through
//! this link, and the trigger wiring routes child events back to the owner.

use kron_core::{
    Error, ObjectKey, OwnerReference, Resource, Result, TypeDescriptor, TypeRegistry,
};

/// Stamp `child` with a controller reference to `owner`.
///
/// An existing reference to the same owner is replaced, never duplicated.
///
/// # Errors
///
/// - [`Error::UnresolvedType`] if the owner type is not registered
/// - [`Error::OwnerTerminating`] if the owner is being deleted
/// - [`Error::AlreadyOwned`] if another object already controls the child
/// - [`Error::Invalid`] if the owner has not been stored yet or lives in
///   another namespace
pub fn set_controller_reference<O: Resource, C: Resource>(
    owner: &O,
    mut child: C,
    registry: &TypeRegistry,
) -> Result<C> {
    let descriptor = registry.require::<O>()?;
    let owner_meta = owner.meta();

    if owner_meta.is_terminating() {
        return Err(Error::OwnerTerminating { key: owner.key() });
    }

    let uid = owner_meta.uid.ok_or_else(|| {
        Error::invalid(format!("{} '{}' has no uid yet", O::KIND, owner.key()))
    })?;

    if child.meta().namespace != owner_meta.namespace {
        return Err(Error::invalid(format!(
            "{} '{}' cannot own {} '{}' across namespaces",
            O::KIND,
            owner.key(),
            C::KIND,
            child.key()
        )));
    }

    if let Some(existing) = controller_of(&child).filter(|r| r.uid != uid) {
        return Err(Error::AlreadyOwned {
            key: child.key(),
            owner_kind: existing.kind.clone(),
            owner_name: existing.name.clone(),
            owner_uid: existing.uid,
        });
    }

    let reference = OwnerReference {
        api_version: descriptor.api_version(),
        kind: descriptor.kind.clone(),
        name: owner_meta.name.clone(),
        uid,
        controller: true,
        block_owner_deletion: true,
    };

    let references = &mut child.meta_mut().owner_references;
    references.retain(|r| r.uid != uid);
    references.push(reference);
    Ok(child)
}

/// The controller reference of `child`, if any.
pub fn controller_of<C: Resource>(child: &C) -> Option<&OwnerReference> {
    child.meta().owner_references.iter().find(|r| r.controller)
}

/// Key of the object controlling `child`, if that object is of type `owner`.
pub fn owner_key<C: Resource>(child: &C, owner: &TypeDescriptor) -> Option<ObjectKey> {
    controller_of(child)
        .filter(|r| r.kind == owner.kind && r.api_version == owner.api_version())
        .map(|r| child.key().sibling(r.name.clone()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use kron_api::{CronJob, Job};
    use kron_core::{ObjectMeta, Uid};

    use super::*;

    fn stored_cronjob(name: &str) -> CronJob {
        let mut cronjob = CronJob::new("default", name, "*/5 * * * *", vec![]);
        cronjob.metadata.uid = Some(Uid::new());
        cronjob
    }

    fn job(name: &str) -> Job {
        Job {
            metadata: ObjectMeta::new("default", name),
            spec: Default::default(),
            status: Default::default(),
        }
    }

    #[test]
    fn test_stamps_controller_reference() {
        let owner = stored_cronjob("job-a");
        let child = set_controller_reference(&owner, job("job-a-job"), &kron_api::registry()).unwrap();

        let reference = controller_of(&child).unwrap();
        assert_eq!(reference.name, "job-a");
        assert_eq!(reference.kind, "CronJob");
        assert_eq!(reference.api_version, "batch.example.com/v1");
        assert_eq!(Some(reference.uid), owner.metadata.uid);
        assert!(reference.block_owner_deletion);
    }

    #[test]
    fn test_restamping_does_not_duplicate() {
        let owner = stored_cronjob("job-a");
        let registry = kron_api::registry();
        let once = set_controller_reference(&owner, job("job-a-job"), &registry).unwrap();
        let twice = set_controller_reference(&owner, once, &registry).unwrap();

        assert_eq!(twice.metadata.owner_references.len(), 1);
    }

    #[test]
    fn test_unregistered_owner_type() {
        let owner = stored_cronjob("job-a");
        let empty = TypeRegistry::builder().build();

        let result = set_controller_reference(&owner, job("job-a-job"), &empty);
        assert!(matches!(result, Err(Error::UnresolvedType { .. })));
    }

    #[test]
    fn test_terminating_owner() {
        let mut owner = stored_cronjob("job-a");
        owner.metadata.deletion_timestamp = Some(Utc::now());

        let result = set_controller_reference(&owner, job("job-a-job"), &kron_api::registry());
        assert!(matches!(result, Err(Error::OwnerTerminating { .. })));
    }

    #[test]
    fn test_child_controlled_by_another_owner() {
        let registry = kron_api::registry();
        let first = stored_cronjob("job-a");
        let second = stored_cronjob("job-b");
        let child = set_controller_reference(&first, job("shared"), &registry).unwrap();

        let result = set_controller_reference(&second, child, &registry);
        match result {
            Err(Error::AlreadyOwned { owner_name, .. }) => assert_eq!(owner_name, "job-a"),
            other => panic!("expected AlreadyOwned, got {other:?}"),
        }
    }

    #[test]
    fn test_unstored_owner_rejected() {
        let owner = CronJob::new("default", "job-a", "*/5 * * * *", vec![]);
        let result = set_controller_reference(&owner, job("job-a-job"), &kron_api::registry());
        assert!(matches!(result, Err(Error::Invalid { .. })));
    }

    #[test]
    fn test_cross_namespace_rejected() {
        let owner = stored_cronjob("job-a");
        let mut child = job("job-a-job");
        child.metadata.namespace = "other".to_string();

        let result = set_controller_reference(&owner, child, &kron_api::registry());
        assert!(matches!(result, Err(Error::Invalid { .. })));
    }

    #[test]
    fn test_owner_key_matches_type() {
        let registry = kron_api::registry();
        let owner = stored_cronjob("job-a");
        let child = set_controller_reference(&owner, job("job-a-job"), &registry).unwrap();

        let cronjob_type = registry.resolve::<CronJob>().unwrap();
        let job_type = registry.resolve::<Job>().unwrap();
        assert_eq!(owner_key(&child, cronjob_type), Some(owner.key()));
        assert_eq!(owner_key(&child, job_type), None);
        assert_eq!(owner_key(&job("loose"), cronjob_type), None);
    }
}
