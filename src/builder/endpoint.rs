use crate::config::OperatorConfig;
use crate::resources::labels;
use crate::resources::{Endpoint, EndpointSpec, HEADLESS_CLUSTER_IP, ObjectMeta};
use crate::spec::{Sandbox, ServiceSpec};

use super::workload_name;

pub const ENDPOINT_API_VERSION: &str = "v1";
pub const ENDPOINT_KIND: &str = "Service";

/// Build the headless discovery endpoint for one service.
///
/// Only called for services that want one; the selector is exactly the
/// workload's identity labels so it resolves to that service's pods.
pub fn build_discovery_endpoint(
    sandbox: &Sandbox,
    service_name: &str,
    _service: &ServiceSpec,
    config: &OperatorConfig,
) -> Endpoint {
    let mut meta_labels = labels::managed_labels(config, sandbox.name());
    meta_labels.insert(labels::COMPONENT.to_string(), service_name.to_string());

    Endpoint {
        api_version: ENDPOINT_API_VERSION.to_string(),
        kind: ENDPOINT_KIND.to_string(),
        metadata: ObjectMeta {
            labels: meta_labels,
            ..ObjectMeta::named(
                sandbox.namespace(),
                &workload_name(sandbox.name(), service_name),
            )
        },
        spec: EndpointSpec {
            cluster_ip: HEADLESS_CLUSTER_IP.to_string(),
            selector: labels::service_selector(sandbox.name(), service_name),
            ports: Vec::new(),
        },
    }
}
