use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{ReconcileError, ServiceError, ServiceFailure, UpsertError};
use super::prune::{DesiredNames, prune_orphans};
use super::status::{Readiness, StatusAggregator};
use super::upsert::{UpsertAction, upsert};
use super::volume::{DeclarativeOnly, VolumeProvisioner};
use crate::builder::{build_discovery_endpoint, build_workload, workload_name};
use crate::config::{Config, OperatorConfig};
use crate::policy::build_policies;
use crate::resources::{Kind, Workload};
use crate::spec::{Sandbox, ServiceSpec, ServiceStatus};
use crate::store::{self, ControllerReference, OwnerLinker, ResourceStore, StoreError};

/// Steps of one reconciliation pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Load,
    ReconcileVolumes,
    ReconcileServices,
    ReconcilePolicies,
    Prune,
    UpdateStatus,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::ReconcileVolumes => "volumes",
            Phase::ReconcileServices => "services",
            Phase::ReconcilePolicies => "policies",
            Phase::Prune => "prune",
            Phase::UpdateStatus => "status",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Store writes made by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl Changes {
    fn record(&mut self, action: UpsertAction) {
        match action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
        }
    }

    /// Whether the pass left derived objects exactly as it found them.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0
    }
}

/// Summary of a successful pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub services: BTreeMap<String, ServiceStatus>,
    pub changes: Changes,
    pub pruned: Vec<String>,
    pub status_written: bool,
}

impl PassReport {
    pub fn ready_count(&self) -> usize {
        self.services.values().filter(|s| s.ready).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The sandbox no longer exists; its derived objects go with it.
    Missing,
    Converged(PassReport),
}

/// Convergence engine for sandboxes.
///
/// Holds no per-sandbox state, so one instance may reconcile distinct
/// sandboxes concurrently. Passes for the same sandbox must be serialized
/// by the caller.
pub struct Reconciler<S: ?Sized, V = DeclarativeOnly, O = ControllerReference> {
    store: Arc<S>,
    volumes: V,
    owner: O,
    config: OperatorConfig,
    prune: bool,
}

impl<S: ResourceStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            volumes: DeclarativeOnly::new(config.operator.clone()),
            owner: ControllerReference,
            config: config.operator.clone(),
            prune: config.reconcile.prune_orphans,
        }
    }
}

impl<S, V, O> Reconciler<S, V, O>
where
    S: ResourceStore + ?Sized,
    V: VolumeProvisioner,
    O: OwnerLinker,
{
    pub fn with_volumes<V2: VolumeProvisioner>(self, volumes: V2) -> Reconciler<S, V2, O> {
        Reconciler {
            store: self.store,
            volumes,
            owner: self.owner,
            config: self.config,
            prune: self.prune,
        }
    }

    pub fn with_owner<O2: OwnerLinker>(self, owner: O2) -> Reconciler<S, V, O2> {
        Reconciler {
            store: self.store,
            volumes: self.volumes,
            owner,
            config: self.config,
            prune: self.prune,
        }
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one pass for `namespace/name`.
    ///
    /// Volumes, services, policies, prune and status run strictly in that
    /// order, after sandbox-wide validation. An invalid spec, a volume or
    /// a policy failure aborts the remaining phases; a
    /// service failure only affects that service. Status is written at
    /// most once, even when the pass fails.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PassOutcome, ReconcileError> {
        debug!(phase = %Phase::Load, %namespace, %name);
        let Some(sandbox) = store::get_typed::<Sandbox, S>(self.store.as_ref(), namespace, name)
            .await
            .map_err(ReconcileError::Load)?
        else {
            debug!(%namespace, %name, "sandbox is gone; nothing to do");
            return Ok(PassOutcome::Missing);
        };

        info!(
            sandbox = %name,
            %namespace,
            services = sandbox.spec.services.len(),
            networks = sandbox.spec.networks.len(),
            "reconciling sandbox"
        );

        let mut status = StatusAggregator::new(&sandbox.status, sandbox.spec.services.keys());
        let mut report = PassReport::default();
        let mut failures = Vec::new();

        let fatal = self
            .converge(&sandbox, &mut status, &mut report, &mut failures)
            .await
            .err();
        if let Some(err) = &fatal {
            warn!(sandbox = %name, phase = %err.phase(), "pass aborted: {err}");
            status.record_fatal(err);
        }

        debug!(phase = %Phase::UpdateStatus, sandbox = %name);
        let new_status = status.finish(Utc::now());
        report.services = sandbox
            .spec
            .services
            .keys()
            .filter_map(|svc| new_status.services.get(svc).map(|s| (svc.clone(), s.clone())))
            .collect();

        if new_status != sandbox.status {
            let mut updated = sandbox.clone();
            updated.status = new_status;
            match self.store.update_status(updated).await {
                Ok(_) => report.status_written = true,
                Err(e) if fatal.is_none() => return Err(ReconcileError::Status(e)),
                Err(e) => warn!(sandbox = %name, "failed to write status after abort: {e}"),
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if !failures.is_empty() {
            return Err(ReconcileError::Services(failures));
        }

        info!(
            sandbox = %name,
            phase = %Phase::Done,
            ready = report.ready_count(),
            total = report.services.len(),
            created = report.changes.created,
            updated = report.changes.updated,
            pruned = report.pruned.len(),
            "sandbox reconciled"
        );
        Ok(PassOutcome::Converged(report))
    }

    async fn converge(
        &self,
        sandbox: &Sandbox,
        status: &mut StatusAggregator,
        report: &mut PassReport,
        failures: &mut Vec<ServiceFailure>,
    ) -> Result<(), ReconcileError> {
        sandbox.validate().map_err(ReconcileError::InvalidSpec)?;

        debug!(phase = %Phase::ReconcileVolumes, sandbox = %sandbox.name());
        self.reconcile_volumes(sandbox).await?;

        debug!(phase = %Phase::ReconcileServices, sandbox = %sandbox.name());
        for (service_name, service) in &sandbox.spec.services {
            match self
                .reconcile_service(sandbox, service_name, service, &mut report.changes)
                .await
            {
                Ok(observed) => status.record(service_name, observed),
                Err(error) => {
                    warn!(
                        sandbox = %sandbox.name(),
                        service = %service_name,
                        "service failed: {error}"
                    );
                    status.record_failure(service_name, &error);
                    failures.push(ServiceFailure {
                        service: service_name.clone(),
                        error,
                    });
                }
            }
        }

        debug!(phase = %Phase::ReconcilePolicies, sandbox = %sandbox.name());
        let policy_names = self.reconcile_policies(sandbox, &mut report.changes).await?;

        if self.prune {
            debug!(phase = %Phase::Prune, sandbox = %sandbox.name());
            let desired = self.desired_names(sandbox, policy_names);
            report.pruned = prune_orphans(self.store.as_ref(), sandbox, &desired)
                .await
                .map_err(ReconcileError::Prune)?;
            status.forget_removed();
        }

        Ok(())
    }

    async fn reconcile_volumes(&self, sandbox: &Sandbox) -> Result<(), ReconcileError> {
        for (volume_name, volume) in &sandbox.spec.volumes {
            self.volumes
                .ensure_volume(sandbox, volume_name, volume)
                .await
                .map_err(|source| ReconcileError::Volume {
                    volume: volume_name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn reconcile_service(
        &self,
        sandbox: &Sandbox,
        service_name: &str,
        service: &ServiceSpec,
        changes: &mut Changes,
    ) -> Result<ServiceStatus, ServiceError> {
        sandbox
            .spec
            .validate_service(sandbox.name(), service_name, service)?;

        let desired = build_workload(sandbox, service_name, service, &self.config);
        let (_, action) = upsert(self.store.as_ref(), &self.owner, sandbox, desired)
            .await
            .map_err(ServiceError::Workload)?;
        changes.record(action);

        // Replica counts come from the cluster; re-read for the latest.
        let name = workload_name(sandbox.name(), service_name);
        let workload = store::get_typed::<Workload, S>(self.store.as_ref(), sandbox.namespace(), &name)
            .await
            .and_then(|w| {
                w.ok_or_else(|| StoreError::not_found(Kind::Workload, sandbox.namespace(), &name))
            })
            .map_err(|e| ServiceError::Workload(UpsertError::Store(e)))?;

        if service.wants_discovery_endpoint() {
            let endpoint = build_discovery_endpoint(sandbox, service_name, service, &self.config);
            let (_, action) = upsert(self.store.as_ref(), &self.owner, sandbox, endpoint)
                .await
                .map_err(ServiceError::Endpoint)?;
            changes.record(action);
        }

        Ok(Readiness::classify(&workload.status).into())
    }

    async fn reconcile_policies(
        &self,
        sandbox: &Sandbox,
        changes: &mut Changes,
    ) -> Result<Vec<String>, ReconcileError> {
        let mut names = Vec::new();
        for policy in build_policies(sandbox, &self.config) {
            let policy_name = policy.metadata.name.clone();
            let (_, action) = upsert(self.store.as_ref(), &self.owner, sandbox, policy)
                .await
                .map_err(|source| ReconcileError::Policy {
                    policy: policy_name.clone(),
                    source,
                })?;
            changes.record(action);
            names.push(policy_name);
        }
        Ok(names)
    }

    fn desired_names(&self, sandbox: &Sandbox, policies: Vec<String>) -> DesiredNames {
        let services = &sandbox.spec.services;
        DesiredNames {
            workloads: services
                .keys()
                .map(|svc| workload_name(sandbox.name(), svc))
                .collect(),
            endpoints: services
                .iter()
                .filter(|(_, spec)| spec.wants_discovery_endpoint())
                .map(|(svc, _)| workload_name(sandbox.name(), svc))
                .collect(),
            policies: policies.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{NetworkPolicy, PolicyRule, ingress_allowed};
    use crate::reconcile::volume::{MockVolumeProvisioner, VolumeError};
    use crate::resources::labels;
    use crate::resources::{Object, Resource, WorkloadStatus};
    use crate::spec::{ConditionStatus, SandboxSpec, ValidationError, VolumeSpec};
    use crate::store::{MemoryStore, MockOwnerLinker, MockResourceStore, OwnershipError};

    fn service(image: &str) -> ServiceSpec {
        ServiceSpec {
            image: image.to_string(),
            dns_record: true,
            ..Default::default()
        }
    }

    async fn seeded(spec: SandboxSpec) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .create(Sandbox::new("agents", "box", spec).into_object())
            .await
            .unwrap();
        store
    }

    fn two_services() -> SandboxSpec {
        let mut spec = SandboxSpec::default();
        spec.services.insert("db".to_string(), service("postgres"));
        spec.services.insert("web".to_string(), service("nginx"));
        spec
    }

    #[tokio::test]
    async fn test_first_pass_creates_everything() {
        let store = seeded(two_services()).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());

        let PassOutcome::Converged(report) = reconciler.reconcile("agents", "box").await.unwrap()
        else {
            panic!("sandbox should exist");
        };
        // 2 workloads, 2 endpoints, egress and default-deny policies.
        assert_eq!(report.changes.created, 6);
        assert!(report.status_written);
        assert_eq!(report.services["web"].message, "starting");
    }

    #[tokio::test]
    async fn test_missing_sandbox_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store, &Config::default());
        assert_eq!(
            reconciler.reconcile("agents", "gone").await.unwrap(),
            PassOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_invalid_service_does_not_touch_store() {
        let mut spec = two_services();
        spec.services.insert("broken".to_string(), service(""));
        let store = seeded(spec).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());

        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        let ReconcileError::Services(failures) = err else {
            panic!("expected per-service failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "broken");
        assert!(matches!(failures[0].error, ServiceError::Invalid(_)));

        assert!(store.get(Kind::Workload, "agents", "box-broken").await.is_err());
        assert!(store.get(Kind::Workload, "agents", "box-web").await.is_ok());

        let sandbox: Sandbox = store::get_typed(store.as_ref(), "agents", "box")
            .await
            .unwrap()
            .unwrap();
        assert!(!sandbox.status.services["broken"].ready);
        assert!(
            sandbox.status.services["broken"]
                .message
                .starts_with("invalid service spec")
        );
    }

    #[tokio::test]
    async fn test_volume_failure_aborts_pass_but_writes_status() {
        let mut spec = two_services();
        spec.volumes.insert("data".to_string(), VolumeSpec::default());
        let store = seeded(spec).await;

        let mut volumes = MockVolumeProvisioner::new();
        volumes
            .expect_ensure_volume()
            .times(1)
            .returning(|_, _, _| Err(VolumeError::Provision("no capacity".to_string())));
        let reconciler = Reconciler::new(store.clone(), &Config::default()).with_volumes(volumes);

        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        assert_eq!(err.phase(), Phase::ReconcileVolumes);
        assert!(store.get(Kind::Workload, "agents", "box-web").await.is_err());

        let sandbox: Sandbox = store::get_typed(store.as_ref(), "agents", "box")
            .await
            .unwrap()
            .unwrap();
        let ready = sandbox.status.condition("Ready").unwrap();
        assert_eq!(ready.reason, "ReconcileFailed");
        assert!(ready.message.contains("no capacity"), "{}", ready.message);
    }

    #[tokio::test]
    async fn test_workload_failure_is_isolated() {
        let mut sandbox = Sandbox::new("agents", "box", two_services());
        sandbox.metadata.uid = Some("uid-box".to_string());
        let loaded = sandbox.clone();

        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .returning(move |kind, _, name| match kind {
                Kind::Sandbox => Ok(loaded.clone().into_object()),
                Kind::Workload if name == "box-web" => {
                    let mut w = build_workload(
                        &loaded,
                        "web",
                        &loaded.spec.services["web"],
                        &OperatorConfig::default(),
                    );
                    w.status.replicas = 1;
                    w.status.ready_replicas = 1;
                    Ok(w.into_object())
                }
                _ => Err(StoreError::not_found(kind, "agents", name)),
            });
        store.expect_create().returning(|object| match &object {
            Object::Workload(w) if w.metadata.name == "box-db" => {
                Err(StoreError::Rejected("quota exceeded".to_string()))
            }
            Object::Endpoint(e) if e.metadata.name == "box-db" => {
                panic!("endpoint of a failed workload must not be attempted")
            }
            _ => Ok(object),
        });
        store.expect_update().returning(Ok);
        store
            .expect_update_status()
            .times(1)
            .returning(|sandbox| {
                let services = &sandbox.status.services;
                assert!(!services["db"].ready);
                assert!(services["db"].message.contains("quota exceeded"));
                assert!(services["web"].ready);
                Ok(sandbox)
            });
        store.expect_list().returning(|_, _, _| Ok(Vec::new()));

        let reconciler = Reconciler::new(Arc::new(store), &Config::default());
        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        let ReconcileError::Services(failures) = err else {
            panic!("expected per-service failure, got {err}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "db");
    }

    #[tokio::test]
    async fn test_ownership_failure_is_isolated_to_its_service() {
        let store = seeded(two_services()).await;
        let mut owner = MockOwnerLinker::new();
        owner.expect_attach_owner().returning(|child, sandbox| {
            if child.name == "box-web" {
                Err(OwnershipError::CrossNamespace {
                    child: child.name.clone(),
                    child_namespace: "elsewhere".to_string(),
                    owner_namespace: sandbox.namespace().to_string(),
                })
            } else {
                ControllerReference.attach_owner(child, sandbox)
            }
        });
        let reconciler = Reconciler::new(store.clone(), &Config::default()).with_owner(owner);

        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        let ReconcileError::Services(failures) = err else {
            panic!("expected per-service failure, got {err}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].service, "web");
        assert!(matches!(
            failures[0].error,
            ServiceError::Workload(UpsertError::Ownership(_))
        ));

        assert!(store.get(Kind::Workload, "agents", "box-web").await.is_err());
        assert!(store.get(Kind::Endpoint, "agents", "box-web").await.is_err());
        assert!(store.get(Kind::Workload, "agents", "box-db").await.is_ok());
        assert!(store.get(Kind::Endpoint, "agents", "box-db").await.is_ok());
        assert!(
            store
                .get(Kind::NetworkPolicy, "agents", "box-default-deny-ingress")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_policy_failure_is_fatal() {
        let mut sandbox = Sandbox::new("agents", "box", SandboxSpec::default());
        sandbox.metadata.uid = Some("uid-box".to_string());

        let mut store = MockResourceStore::new();
        store.expect_get().returning(move |kind, ns, name| match kind {
            Kind::Sandbox => Ok(sandbox.clone().into_object()),
            _ => Err(StoreError::not_found(kind, ns, name)),
        });
        store
            .expect_create()
            .returning(|_| Err(StoreError::Rejected("admission denied".to_string())));
        store.expect_update_status().times(1).returning(Ok);
        store.expect_list().never();

        let reconciler = Reconciler::new(Arc::new(store), &Config::default());
        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        assert!(
            matches!(&err, ReconcileError::Policy { policy, .. } if policy == "box-egress"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_invalid_network_name_blocks_every_write() {
        let mut spec = two_services();
        spec.networks.insert("Bad_Net".to_string(), String::new());
        if let Some(web) = spec.services.get_mut("web") {
            web.networks = vec!["Bad_Net".to_string()];
        }
        let store = seeded(spec).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());

        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        assert!(
            matches!(
                &err,
                ReconcileError::InvalidSpec(ValidationError::InvalidName { what: "network", .. })
            ),
            "{err}"
        );
        assert_eq!(err.phase(), Phase::Load);

        // Only the sandbox itself remains, carrying the failure.
        let objects = store.snapshot().await;
        assert_eq!(objects.len(), 1, "{objects:?}");
        let sandbox = Sandbox::from_object(objects[0].clone()).unwrap();
        let ready = sandbox.status.condition("Ready").unwrap();
        assert_eq!(ready.reason, "ReconcileFailed");
        assert!(ready.message.contains("Bad_Net"), "{}", ready.message);
    }

    #[tokio::test]
    async fn test_invalid_volume_name_never_reaches_provisioner() {
        let mut spec = two_services();
        spec.volumes.insert("Data".to_string(), VolumeSpec::default());
        let store = seeded(spec).await;

        let mut volumes = MockVolumeProvisioner::new();
        volumes.expect_ensure_volume().never();
        let reconciler = Reconciler::new(store.clone(), &Config::default()).with_volumes(volumes);

        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec(_)), "{err}");
        assert!(store.get(Kind::Workload, "agents", "box-web").await.is_err());
    }

    #[tokio::test]
    async fn test_sandbox_name_must_be_a_label() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(Sandbox::new("agents", "Box_1", two_services()).into_object())
            .await
            .unwrap();
        let reconciler = Reconciler::new(store.clone(), &Config::default());

        let err = reconciler.reconcile("agents", "Box_1").await.unwrap_err();
        assert!(
            matches!(
                &err,
                ReconcileError::InvalidSpec(ValidationError::InvalidName { what: "sandbox", .. })
            ),
            "{err}"
        );
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_is_reported() {
        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .returning(|_, _, _| Err(StoreError::Rejected("unavailable".to_string())));
        let reconciler = Reconciler::new(Arc::new(store), &Config::default());
        let err = reconciler.reconcile("agents", "box").await.unwrap_err();
        assert_eq!(err.phase(), Phase::Load);
    }

    async fn converged(reconciler: &Reconciler<MemoryStore>, name: &str) -> PassReport {
        match reconciler.reconcile("agents", name).await.unwrap() {
            PassOutcome::Converged(report) => report,
            PassOutcome::Missing => panic!("sandbox {name} should exist"),
        }
    }

    async fn edit_spec(store: &MemoryStore, edit: impl FnOnce(&mut SandboxSpec)) {
        let mut sandbox: Sandbox = store::get_typed(store, "agents", "box")
            .await
            .unwrap()
            .unwrap();
        edit(&mut sandbox.spec);
        store.update(sandbox.into_object()).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_pass_is_a_noop() {
        let store = seeded(two_services()).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());

        converged(&reconciler, "box").await;
        let before = store.snapshot().await;

        let report = converged(&reconciler, "box").await;
        assert!(report.changes.is_noop(), "{:?}", report.changes);
        assert_eq!(report.changes.unchanged, 6);
        assert!(!report.status_written);
        assert!(report.pruned.is_empty());
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_ready_replicas_flip_the_condition() {
        let store = seeded(two_services()).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "box").await;

        for name in ["box-db", "box-web"] {
            store
                .set_workload_status(
                    "agents",
                    name,
                    WorkloadStatus {
                        replicas: 1,
                        ready_replicas: 1,
                    },
                )
                .await
                .unwrap();
        }

        let report = converged(&reconciler, "box").await;
        assert_eq!(report.ready_count(), 2);
        assert!(report.changes.is_noop());
        assert!(report.status_written);

        let sandbox: Sandbox = store::get_typed(store.as_ref(), "agents", "box")
            .await
            .unwrap()
            .unwrap();
        let ready = sandbox.status.condition("Ready").unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "Reconciled");
    }

    #[tokio::test]
    async fn test_removed_service_and_network_are_pruned() {
        let mut spec = two_services();
        spec.networks.insert("front".to_string(), String::new());
        if let Some(web) = spec.services.get_mut("web") {
            web.networks = vec!["front".to_string()];
        }
        let store = seeded(spec).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "box").await;
        assert!(
            store
                .get(Kind::NetworkPolicy, "agents", "box-network-front-ingress")
                .await
                .is_ok()
        );

        edit_spec(&store, |spec| {
            spec.services.remove("db");
            spec.networks.clear();
            if let Some(web) = spec.services.get_mut("web") {
                web.networks.clear();
            }
        })
        .await;

        let report = converged(&reconciler, "box").await;
        assert_eq!(
            report.pruned,
            vec![
                "workloads/box-db",
                "endpoints/box-db",
                "networkpolicies/box-network-front-ingress",
            ]
        );
        assert!(!report.services.contains_key("db"));

        let sandbox: Sandbox = store::get_typed(store.as_ref(), "agents", "box")
            .await
            .unwrap()
            .unwrap();
        assert!(!sandbox.status.services.contains_key("db"));
        assert!(store.get(Kind::Workload, "agents", "box-web").await.is_ok());
    }

    #[tokio::test]
    async fn test_prune_disabled_keeps_orphans() {
        let store = seeded(two_services()).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default()).with_prune(false);
        converged(&reconciler, "box").await;

        edit_spec(&store, |spec| {
            spec.services.remove("db");
        })
        .await;

        let report = converged(&reconciler, "box").await;
        assert!(report.pruned.is_empty());
        assert!(store.get(Kind::Workload, "agents", "box-db").await.is_ok());
    }

    #[tokio::test]
    async fn test_sandboxes_do_not_collide() {
        let store = Arc::new(MemoryStore::new());
        for name in ["alpha", "beta"] {
            store
                .create(Sandbox::new("agents", name, two_services()).into_object())
                .await
                .unwrap();
        }
        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "alpha").await;
        let report = converged(&reconciler, "beta").await;
        assert_eq!(report.changes.created, 6);

        // A later pass for one sandbox never prunes the other's objects.
        let report = converged(&reconciler, "alpha").await;
        assert!(report.pruned.is_empty());

        let workloads: Vec<String> = store
            .snapshot()
            .await
            .iter()
            .filter(|o| o.kind() == Kind::Workload)
            .map(|o| o.metadata().name.clone())
            .collect();
        assert_eq!(
            workloads,
            vec!["alpha-db", "alpha-web", "beta-db", "beta-web"]
        );
    }

    #[tokio::test]
    async fn test_colliding_policy_name_is_not_taken_over() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(Sandbox::new("agents", "a-network-b", SandboxSpec::default()).into_object())
            .await
            .unwrap();
        let mut spec = SandboxSpec::default();
        spec.networks.insert("b-default-deny".to_string(), String::new());
        store
            .create(Sandbox::new("agents", "a", spec).into_object())
            .await
            .unwrap();

        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "a-network-b").await;
        let shared = "a-network-b-default-deny-ingress";
        let before = store.get(Kind::NetworkPolicy, "agents", shared).await.unwrap();

        let err = reconciler.reconcile("agents", "a").await.unwrap_err();
        assert!(
            matches!(
                &err,
                ReconcileError::Policy {
                    policy,
                    source: UpsertError::Ownership(OwnershipError::AlreadyOwned { .. }),
                } if policy == shared
            ),
            "{err}"
        );

        let after = store.get(Kind::NetworkPolicy, "agents", shared).await.unwrap();
        assert_eq!(after, before);
        let policy = NetworkPolicy::from_object(after).unwrap();
        assert_eq!(
            policy.spec.endpoint_selector.match_labels,
            labels::sandbox_selector("a-network-b")
        );
        assert_eq!(policy.spec.rules, vec![PolicyRule::IngressDefaultDeny]);

        // The owner's next pass still sees its own objects as converged.
        let report = converged(&reconciler, "a-network-b").await;
        assert!(report.changes.is_noop(), "{:?}", report.changes);
    }

    #[tokio::test]
    async fn test_colliding_workload_name_is_not_taken_over() {
        let store = Arc::new(MemoryStore::new());
        let mut first = SandboxSpec::default();
        first.services.insert("c".to_string(), service("nginx"));
        let mut second = SandboxSpec::default();
        second.services.insert("b-c".to_string(), service("redis"));
        for (name, spec) in [("a-b", first), ("a", second)] {
            store
                .create(Sandbox::new("agents", name, spec).into_object())
                .await
                .unwrap();
        }

        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "a-b").await;

        let err = reconciler.reconcile("agents", "a").await.unwrap_err();
        let ReconcileError::Services(failures) = err else {
            panic!("expected per-service failure, got {err}");
        };
        assert_eq!(failures[0].service, "b-c");
        assert!(matches!(
            failures[0].error,
            ServiceError::Workload(UpsertError::Ownership(OwnershipError::AlreadyOwned { .. }))
        ));

        let workload: Workload = store::get_typed(store.as_ref(), "agents", "a-b-c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workload.metadata.labels[labels::INSTANCE], "a-b");
    }

    #[tokio::test]
    async fn test_every_service_is_isolated_by_default() {
        let store = seeded(two_services()).await;
        let reconciler = Reconciler::new(store.clone(), &Config::default());
        converged(&reconciler, "box").await;

        let policies: Vec<NetworkPolicy> = store
            .snapshot()
            .await
            .into_iter()
            .filter_map(NetworkPolicy::from_object)
            .collect();
        let workloads: Vec<Workload> = store
            .snapshot()
            .await
            .into_iter()
            .filter_map(Workload::from_object)
            .collect();
        let db = &workloads[0].spec.template.metadata.labels;
        let web = &workloads[1].spec.template.metadata.labels;
        assert!(!ingress_allowed(&policies, db, web));
        assert!(!ingress_allowed(&policies, web, db));
    }
}
