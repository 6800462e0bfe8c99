use crate::config::OperatorConfig;
use crate::resources::labels::{self, Labels};
use crate::resources::{
    Container, LabelSelector, ObjectMeta, PodSpec, PodTemplate, TemplateMeta, Workload,
    WorkloadSpec, WorkloadStatus,
};
use crate::spec::{EnvVar, Sandbox, ServiceSpec};

use super::{governing_service_name, workload_name};

pub const WORKLOAD_API_VERSION: &str = "apps/v1";
pub const WORKLOAD_KIND: &str = "StatefulSet";

/// Identity labels of a service's pods plus one label per network membership.
pub fn workload_labels(
    sandbox: &str,
    service_name: &str,
    service: &ServiceSpec,
    config: &OperatorConfig,
) -> Labels {
    let mut labels = labels::managed_labels(config, sandbox);
    labels.extend(labels::service_selector(sandbox, service_name));
    for network in &service.networks {
        labels.insert(labels::network_label(network), "true".to_string());
    }
    labels
}

/// Drop the runtime class when it is empty or the cluster-default sentinel.
pub fn normalize_runtime_class(requested: Option<&str>, sentinel: &str) -> Option<String> {
    requested
        .map(str::trim)
        .filter(|class| !class.is_empty() && *class != sentinel)
        .map(str::to_string)
}

/// Build the stateful workload for one service.
///
/// The sandbox identity variable comes first in `env` so a user entry with
/// the same name overrides it.
pub fn build_workload(
    sandbox: &Sandbox,
    service_name: &str,
    service: &ServiceSpec,
    config: &OperatorConfig,
) -> Workload {
    let name = workload_name(sandbox.name(), service_name);
    let labels = workload_labels(sandbox.name(), service_name, service, config);

    let mut env = Vec::with_capacity(service.env.len() + 1);
    env.push(EnvVar::new(&config.sandbox_env_var, sandbox.name()));
    env.extend(service.env.iter().cloned());

    let container = Container {
        name: service_name.to_string(),
        image: service.image.clone(),
        command: service.command.clone(),
        args: service.args.clone(),
        working_dir: service.working_dir.clone(),
        env,
        resources: service.resources.clone(),
    };

    Workload {
        api_version: WORKLOAD_API_VERSION.to_string(),
        kind: WORKLOAD_KIND.to_string(),
        metadata: ObjectMeta {
            labels: labels.clone(),
            ..ObjectMeta::named(sandbox.namespace(), &name)
        },
        spec: WorkloadSpec {
            service_name: governing_service_name(service_name),
            replicas: config.replicas,
            selector: LabelSelector {
                match_labels: labels::service_selector(sandbox.name(), service_name),
            },
            template: PodTemplate {
                metadata: TemplateMeta { labels },
                spec: PodSpec {
                    enable_service_links: false,
                    runtime_class_name: normalize_runtime_class(
                        service.runtime_class_name.as_deref(),
                        &config.runtime_class_default_sentinel,
                    ),
                    containers: vec![container],
                },
            },
        },
        status: WorkloadStatus::default(),
    }
}
