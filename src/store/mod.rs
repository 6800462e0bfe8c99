//! The resource store the control loop converges against.
//!
//! [`ResourceStore`] is the only way the engine touches persisted state.
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! dry runs, and [`FileStore`], which keeps one JSON document per object.

mod error;
mod file;
mod memory;
mod owner;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use owner::{ControllerReference, OwnerLinker, OwnershipError};

#[cfg(test)]
pub use owner::MockOwnerLinker;

use async_trait::async_trait;

use crate::resources::labels::Labels;
use crate::resources::{Kind, Object, Resource};
use crate::spec::Sandbox;

/// Namespaced object storage.
///
/// `get` and `update` report a missing object as [`StoreError::NotFound`].
/// `update` and `update_status` never replace identity metadata, and an
/// update that changes nothing leaves the resource version untouched.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object, StoreError>;

    /// Objects of `kind` in `namespace` whose labels contain `selector`.
    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Object>, StoreError>;

    async fn create(&self, object: Object) -> Result<Object, StoreError>;

    /// Replace the spec of an existing object. Status is preserved.
    async fn update(&self, object: Object) -> Result<Object, StoreError>;

    /// Replace only the status of a sandbox.
    async fn update_status(&self, sandbox: Sandbox) -> Result<Sandbox, StoreError>;

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Typed `get` that folds `NotFound` into `None`.
pub async fn get_typed<R, S>(store: &S, namespace: &str, name: &str) -> Result<Option<R>, StoreError>
where
    R: Resource,
    S: ResourceStore + ?Sized,
{
    match store.get(R::KIND, namespace, name).await {
        Ok(object) => expect_kind(object).map(Some),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn expect_kind<R: Resource>(object: Object) -> Result<R, StoreError> {
    let found = object.kind();
    R::from_object(object).ok_or(StoreError::KindMismatch {
        expected: R::KIND,
        found,
    })
}

/// Merge an incoming update into the stored object.
///
/// Identity comes from `stored`; status is carried over unless
/// `status_only` is set, in which case only the status is taken from
/// `incoming`. Returns `None` when the result equals `stored`.
pub(crate) fn merge_update(
    stored: &Object,
    incoming: Object,
    status_only: bool,
) -> Result<Option<Object>, StoreError> {
    let meta = stored.metadata();
    let expected = incoming.metadata().resource_version.as_deref();
    if expected.is_some() && expected != meta.resource_version.as_deref() {
        return Err(StoreError::Conflict {
            kind: stored.kind(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        });
    }

    let merged = match (stored, incoming) {
        (Object::Sandbox(old), Object::Sandbox(mut new)) => {
            if status_only {
                let status = new.status;
                new = old.clone();
                new.status = status;
            } else {
                new.status = old.status.clone();
            }
            Object::Sandbox(new)
        }
        (Object::Workload(old), Object::Workload(mut new)) => {
            new.status = old.status;
            Object::Workload(new)
        }
        (_, other) if other.kind() == stored.kind() => other,
        (_, other) => {
            return Err(StoreError::KindMismatch {
                expected: stored.kind(),
                found: other.kind(),
            });
        }
    };

    let mut merged = merged;
    let target = merged.metadata_mut();
    target.uid = meta.uid.clone();
    target.resource_version = meta.resource_version.clone();
    target.owner_references = meta.owner_references.clone();

    if &merged == stored {
        return Ok(None);
    }

    let next = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    merged.metadata_mut().resource_version = Some(next.to_string());
    Ok(Some(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::WorkloadStatus;
    use crate::spec::{SandboxSpec, ServiceStatus};

    fn stored_sandbox() -> Sandbox {
        let mut sandbox = Sandbox::new("agents", "box", SandboxSpec::default());
        sandbox.metadata.uid = Some("uid-1".to_string());
        sandbox.metadata.resource_version = Some("3".to_string());
        sandbox
    }

    #[test]
    fn test_unchanged_update_is_noop() {
        let stored = stored_sandbox();
        let merged = merge_update(&stored.clone().into_object(), stored.into_object(), false);
        assert!(merged.unwrap().is_none());
    }

    #[test]
    fn test_spec_update_keeps_identity_and_status() {
        let mut stored = stored_sandbox();
        stored.status.services.insert(
            "web".to_string(),
            ServiceStatus {
                ready: true,
                message: "ready".to_string(),
            },
        );

        let mut incoming = Sandbox::new("agents", "box", SandboxSpec::default());
        incoming.spec.allow_domains.push("example.com".to_string());

        let merged = merge_update(&stored.clone().into_object(), incoming.into_object(), false)
            .unwrap()
            .unwrap();
        let merged = Sandbox::from_object(merged).unwrap();
        assert_eq!(merged.metadata.uid.as_deref(), Some("uid-1"));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("4"));
        assert_eq!(merged.status, stored.status);
        assert_eq!(merged.spec.allow_domains, vec!["example.com"]);
    }

    #[test]
    fn test_status_update_keeps_spec() {
        let stored = stored_sandbox();
        let mut incoming = stored.clone();
        incoming.spec.allow_domains.push("ignored.com".to_string());
        incoming.status.services.insert("web".to_string(), ServiceStatus::default());

        let merged = merge_update(&stored.clone().into_object(), incoming.into_object(), true)
            .unwrap()
            .unwrap();
        let merged = Sandbox::from_object(merged).unwrap();
        assert!(merged.spec.allow_domains.is_empty());
        assert!(merged.status.services.contains_key("web"));
    }

    #[test]
    fn test_stale_resource_version_conflicts() {
        let stored = stored_sandbox();
        let mut incoming = stored.clone();
        incoming.metadata.resource_version = Some("2".to_string());
        let err = merge_update(&stored.into_object(), incoming.into_object(), false).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_workload_status_is_not_overwritten() {
        let config = crate::config::OperatorConfig::default();
        let sandbox = stored_sandbox();
        let svc = crate::spec::ServiceSpec {
            image: "nginx".to_string(),
            ..Default::default()
        };
        let mut stored = crate::builder::build_workload(&sandbox, "web", &svc, &config);
        stored.status = WorkloadStatus {
            replicas: 1,
            ready_replicas: 1,
        };
        let incoming = crate::builder::build_workload(&sandbox, "web", &svc, &config);

        let merged = merge_update(&stored.clone().into_object(), incoming.into_object(), false)
            .unwrap();
        assert!(merged.is_none());
    }
}
