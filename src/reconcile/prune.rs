//! Removal of derived objects whose names left the spec.

use std::collections::BTreeSet;
use tracing::info;

use crate::resources::labels;
use crate::resources::{Kind, Object};
use crate::spec::Sandbox;
use crate::store::{ResourceStore, StoreError};

/// Derived object names the current spec produces, per prunable kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredNames {
    pub workloads: BTreeSet<String>,
    pub endpoints: BTreeSet<String>,
    pub policies: BTreeSet<String>,
}

impl DesiredNames {
    fn for_kind(&self, kind: Kind) -> Option<&BTreeSet<String>> {
        match kind {
            Kind::Workload => Some(&self.workloads),
            Kind::Endpoint => Some(&self.endpoints),
            Kind::NetworkPolicy => Some(&self.policies),
            Kind::Sandbox | Kind::VolumeClaim => None,
        }
    }
}

const PRUNABLE: [Kind; 3] = [Kind::Workload, Kind::Endpoint, Kind::NetworkPolicy];

fn is_orphan(object: &Object, owner_uid: &str, desired: &BTreeSet<String>) -> bool {
    let meta = object.metadata();
    meta.is_controlled_by(owner_uid) && !desired.contains(&meta.name)
}

/// Delete objects controlled by `sandbox` that the spec no longer names.
///
/// Objects carrying the sandbox label but controlled by someone else are
/// left alone. Returns `kind/name` of everything deleted.
pub async fn prune_orphans<S>(
    store: &S,
    sandbox: &Sandbox,
    desired: &DesiredNames,
) -> Result<Vec<String>, StoreError>
where
    S: ResourceStore + ?Sized,
{
    let Some(uid) = sandbox.metadata.uid.as_deref() else {
        return Ok(Vec::new());
    };
    let selector = labels::sandbox_selector(sandbox.name());
    let mut pruned = Vec::new();

    for kind in PRUNABLE {
        let Some(names) = desired.for_kind(kind) else {
            continue;
        };
        let orphans: Vec<String> = store
            .list(kind, sandbox.namespace(), &selector)
            .await?
            .iter()
            .filter(|o| is_orphan(o, uid, names))
            .map(|o| o.metadata().name.clone())
            .collect();

        for name in orphans {
            match store.delete(kind, sandbox.namespace(), &name).await {
                Ok(()) => info!(%kind, %name, "pruned orphaned object"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            pruned.push(format!("{kind}/{name}"));
        }
    }

    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_discovery_endpoint;
    use crate::config::OperatorConfig;
    use crate::resources::Resource;
    use crate::spec::{SandboxSpec, ServiceSpec};
    use crate::store::{ControllerReference, MemoryStore, OwnerLinker};

    async fn seeded() -> (MemoryStore, Sandbox) {
        let store = MemoryStore::new();
        let created = store
            .create(Sandbox::new("agents", "box", SandboxSpec::default()).into_object())
            .await
            .unwrap();
        let sandbox = Sandbox::from_object(created).unwrap();

        for service in ["web", "old"] {
            let mut endpoint = build_discovery_endpoint(
                &sandbox,
                service,
                &ServiceSpec::default(),
                &OperatorConfig::default(),
            );
            ControllerReference
                .attach_owner(&mut endpoint.metadata, &sandbox)
                .unwrap();
            store.create(endpoint.into_object()).await.unwrap();
        }
        (store, sandbox)
    }

    #[tokio::test]
    async fn test_prunes_only_undesired_owned_objects() {
        let (store, sandbox) = seeded().await;
        let desired = DesiredNames {
            endpoints: BTreeSet::from(["box-web".to_string()]),
            ..Default::default()
        };

        let pruned = prune_orphans(&store, &sandbox, &desired).await.unwrap();
        assert_eq!(pruned, vec!["endpoints/box-old"]);
        assert!(store.get(Kind::Endpoint, "agents", "box-web").await.is_ok());
        assert!(
            store
                .get(Kind::Endpoint, "agents", "box-old")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_foreign_objects_survive() {
        let (store, sandbox) = seeded().await;
        let mut stranger = build_discovery_endpoint(
            &sandbox,
            "manual",
            &ServiceSpec::default(),
            &OperatorConfig::default(),
        );
        stranger.metadata.owner_references.clear();
        store.insert(stranger.into_object()).await;

        let desired = DesiredNames {
            endpoints: BTreeSet::from(["box-web".to_string(), "box-old".to_string()]),
            ..Default::default()
        };
        let pruned = prune_orphans(&store, &sandbox, &desired).await.unwrap();
        assert!(pruned.is_empty());
        assert!(store.get(Kind::Endpoint, "agents", "box-manual").await.is_ok());
    }
}
