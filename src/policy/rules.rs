//! Typed policy rules.
//!
//! The enforcement agent consumes loosely-shaped documents; internally each
//! rule is one variant of [`PolicyRule`] and [`super::wire`] maps it to and
//! from the document shape.

use serde::{Deserialize, Serialize};

use crate::resources::labels::{self, Labels};

/// Selects endpoints (pods) by exact label match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSelector {
    #[serde(default)]
    pub match_labels: Labels,
}

impl EndpointSelector {
    pub fn new(match_labels: Labels) -> Self {
        Self { match_labels }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        labels::selector_matches(&self.match_labels, labels)
    }
}

/// A destination name matcher for FQDN egress rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FqdnMatch {
    /// Exact domain name.
    Name(String),
    /// Glob pattern, e.g. `*.example.com`.
    Pattern(String),
}

/// One rule of a network policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRule {
    /// DNS traffic (UDP and TCP 53) to the cluster DNS service, with lookups
    /// limited to `patterns`.
    EgressDns {
        dns_server: EndpointSelector,
        patterns: Vec<String>,
    },

    /// Egress to any endpoint of the same sandbox.
    EgressIntraSandbox { peers: EndpointSelector },

    /// Egress to external names.
    EgressFqdn { matches: Vec<FqdnMatch> },

    /// Present-but-empty ingress: nothing is admitted unless another policy
    /// admits it.
    ///
    /// Alongside [`PolicyRule::IngressScoped`] in the same policy this rule
    /// adds nothing: any ingress rule already denies what it does not
    /// admit. Both forms share one document, which reads back without
    /// the deny rule.
    IngressDefaultDeny,

    /// Ingress only from endpoints matching `peers`.
    IngressScoped { peers: EndpointSelector },
}

impl PolicyRule {
    pub fn is_ingress(&self) -> bool {
        matches!(
            self,
            PolicyRule::IngressDefaultDeny | PolicyRule::IngressScoped { .. }
        )
    }
}

/// DNS port, as the enforcement agent expects it (a string).
pub const DNS_PORT: &str = "53";

/// Protocols DNS is allowed over.
pub const DNS_PROTOCOLS: [&str; 2] = ["UDP", "TCP"];
