//! Network isolation policies for a sandbox.
//!
//! Three documents are derived from every sandbox spec:
//! - one egress policy: DNS lookups, intra-sandbox traffic, allow-listed names
//! - one default-deny ingress policy
//! - one ingress policy per logical network, admitting only that network's members
//!
//! Ingress and egress are deliberately asymmetric: any pod may open
//! connections to any other pod of its sandbox, but a pod only accepts
//! connections from peers that share one of its networks.

mod builder;
mod rules;
mod wire;

pub use builder::{
    build_default_deny_ingress_policy, build_network_ingress_policy, build_policies,
    build_sandbox_egress_policy, default_deny_policy_name, dns_patterns, egress_policy_name,
    network_policy_name,
};
pub use rules::{DNS_PORT, DNS_PROTOCOLS, EndpointSelector, FqdnMatch, PolicyRule};
pub use wire::WireError;

use serde::{Deserialize, Serialize};

use crate::resources::ObjectMeta;
use crate::resources::labels::Labels;

pub const POLICY_API_VERSION: &str = "cilium.io/v2";
pub const POLICY_KIND: &str = "CiliumNetworkPolicy";

/// A network policy document as stored and handed to the enforcement agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PolicySpec,
}

/// Selector plus typed rules. Serialized through the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "wire::WirePolicySpec", try_from = "wire::WirePolicySpec")]
pub struct PolicySpec {
    pub endpoint_selector: EndpointSelector,
    pub rules: Vec<PolicyRule>,
}

impl PolicySpec {
    /// Whether the policy applies to a pod carrying `labels`.
    pub fn selects(&self, labels: &Labels) -> bool {
        self.endpoint_selector.matches(labels)
    }

    /// Whether this policy restricts ingress at all.
    pub fn governs_ingress(&self) -> bool {
        self.rules.iter().any(PolicyRule::is_ingress)
    }

    /// Whether this policy admits ingress from a peer carrying `peer`.
    pub fn admits_ingress_from(&self, peer: &Labels) -> bool {
        self.rules.iter().any(|rule| match rule {
            PolicyRule::IngressScoped { peers } => peers.matches(peer),
            _ => false,
        })
    }
}

/// Whether ingress from `peer` into `target` is admitted by any of `policies`.
///
/// Follows the enforcement agent's model: a pod selected by at least one
/// ingress-governing policy only accepts traffic some selecting policy admits.
pub fn ingress_allowed(policies: &[NetworkPolicy], target: &Labels, peer: &Labels) -> bool {
    let selecting: Vec<&PolicySpec> = policies
        .iter()
        .map(|p| &p.spec)
        .filter(|s| s.selects(target) && s.governs_ingress())
        .collect();

    selecting.is_empty() || selecting.iter().any(|s| s.admits_ingress_from(peer))
}
