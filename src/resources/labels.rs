//! Label vocabulary shared by workloads, endpoints and policy selectors.

use std::collections::BTreeMap;

use crate::config::OperatorConfig;

pub const NAME: &str = "app.kubernetes.io/name";
pub const INSTANCE: &str = "app.kubernetes.io/instance";
pub const COMPONENT: &str = "app.kubernetes.io/component";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Service-scoped marker carried by every pod of a service.
pub const SERVICE: &str = "inspect/service";

/// Carried by per-network policy documents, valued with the network name.
pub const NETWORK: &str = "inspect.example.com/network";

/// Membership label for a logical network, valued `"true"`.
pub fn network_label(network: &str) -> String {
    format!("{NETWORK}-{network}")
}

pub type Labels = BTreeMap<String, String>;

/// Sandbox identity: matches every pod of the sandbox.
pub fn sandbox_selector(sandbox: &str) -> Labels {
    Labels::from([(INSTANCE.to_string(), sandbox.to_string())])
}

/// Identity of one service's pods: sandbox, component and service marker.
pub fn service_selector(sandbox: &str, service: &str) -> Labels {
    Labels::from([
        (INSTANCE.to_string(), sandbox.to_string()),
        (COMPONENT.to_string(), service.to_string()),
        (SERVICE.to_string(), service.to_string()),
    ])
}

/// Sandbox identity plus membership of `network`.
pub fn network_selector(sandbox: &str, network: &str) -> Labels {
    let mut labels = sandbox_selector(sandbox);
    labels.insert(network_label(network), "true".to_string());
    labels
}

/// Labels stamped on every object the operator manages for `sandbox`.
pub fn managed_labels(config: &OperatorConfig, sandbox: &str) -> Labels {
    Labels::from([
        (NAME.to_string(), config.app_name.clone()),
        (INSTANCE.to_string(), sandbox.to_string()),
        (MANAGED_BY.to_string(), config.managed_by.clone()),
    ])
}

/// Whether every `selector` entry is present in `labels` with the same value.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}
