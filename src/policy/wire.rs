//! Document shape consumed by the policy enforcement agent.
//!
//! Field names here are a compatibility contract: `endpointSelector`,
//! `egress[].toEndpoints|toPorts|toFQDNs`, `ingress[].fromEndpoints`, and
//! `matchName`/`matchPattern` under `toFQDNs` and `toPorts[].rules.dns`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::PolicySpec;
use super::rules::{DNS_PORT, DNS_PROTOCOLS, EndpointSelector, FqdnMatch, PolicyRule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("egress rule {0} matches no known rule shape")]
    UnknownEgressRule(usize),

    #[error("ingress rule {0} has no fromEndpoints")]
    UnknownIngressRule(usize),

    #[error("DNS rule must allow port 53 over UDP and TCP")]
    UnexpectedDnsPorts,

    #[error("FQDN entry must carry exactly one of matchName or matchPattern")]
    AmbiguousFqdn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePolicySpec {
    endpoint_selector: EndpointSelector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    egress: Option<Vec<WireEgressRule>>,

    /// `Some(vec![])` is default-deny; `None` is "no ingress restriction".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ingress: Option<Vec<WireIngressRule>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEgressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_endpoints: Option<Vec<EndpointSelector>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_ports: Option<Vec<WirePortRule>>,

    #[serde(
        rename = "toFQDNs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    to_fqdns: Option<Vec<WireFqdn>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePortRule {
    ports: Vec<WirePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    rules: Option<WireL7Rules>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WirePort {
    port: String,
    protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireL7Rules {
    #[serde(default)]
    dns: Vec<WireFqdn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFqdn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_endpoints: Option<Vec<EndpointSelector>>,
}

impl From<&FqdnMatch> for WireFqdn {
    fn from(m: &FqdnMatch) -> Self {
        match m {
            FqdnMatch::Name(name) => WireFqdn {
                match_name: Some(name.clone()),
                match_pattern: None,
            },
            FqdnMatch::Pattern(pattern) => WireFqdn {
                match_name: None,
                match_pattern: Some(pattern.clone()),
            },
        }
    }
}

impl TryFrom<WireFqdn> for FqdnMatch {
    type Error = WireError;

    fn try_from(w: WireFqdn) -> Result<Self, WireError> {
        match (w.match_name, w.match_pattern) {
            (Some(name), None) => Ok(FqdnMatch::Name(name)),
            (None, Some(pattern)) => Ok(FqdnMatch::Pattern(pattern)),
            _ => Err(WireError::AmbiguousFqdn),
        }
    }
}

fn dns_ports() -> Vec<WirePort> {
    DNS_PROTOCOLS
        .iter()
        .map(|protocol| WirePort {
            port: DNS_PORT.to_string(),
            protocol: protocol.to_string(),
        })
        .collect()
}

impl From<PolicySpec> for WirePolicySpec {
    fn from(spec: PolicySpec) -> Self {
        let mut egress = Vec::new();
        let mut ingress = Vec::new();
        let mut has_ingress = false;

        for rule in spec.rules {
            match rule {
                PolicyRule::EgressDns {
                    dns_server,
                    patterns,
                } => egress.push(WireEgressRule {
                    to_endpoints: Some(vec![dns_server]),
                    to_ports: Some(vec![WirePortRule {
                        ports: dns_ports(),
                        rules: Some(WireL7Rules {
                            dns: patterns
                                .into_iter()
                                .map(|p| WireFqdn {
                                    match_name: None,
                                    match_pattern: Some(p),
                                })
                                .collect(),
                        }),
                    }]),
                    to_fqdns: None,
                }),
                PolicyRule::EgressIntraSandbox { peers } => egress.push(WireEgressRule {
                    to_endpoints: Some(vec![peers]),
                    ..Default::default()
                }),
                PolicyRule::EgressFqdn { matches } => egress.push(WireEgressRule {
                    to_fqdns: Some(matches.iter().map(WireFqdn::from).collect()),
                    ..Default::default()
                }),
                PolicyRule::IngressDefaultDeny => has_ingress = true,
                PolicyRule::IngressScoped { peers } => {
                    has_ingress = true;
                    ingress.push(WireIngressRule {
                        from_endpoints: Some(vec![peers]),
                    });
                }
            }
        }

        WirePolicySpec {
            endpoint_selector: spec.endpoint_selector,
            egress: (!egress.is_empty()).then_some(egress),
            ingress: has_ingress.then_some(ingress),
        }
    }
}

impl TryFrom<WirePolicySpec> for PolicySpec {
    type Error = WireError;

    fn try_from(wire: WirePolicySpec) -> Result<Self, WireError> {
        let mut rules = Vec::new();

        for (i, rule) in wire.egress.unwrap_or_default().into_iter().enumerate() {
            rules.push(egress_rule(i, rule)?);
        }

        if let Some(ingress) = wire.ingress {
            if ingress.is_empty() {
                rules.push(PolicyRule::IngressDefaultDeny);
            }
            for (i, rule) in ingress.into_iter().enumerate() {
                let peers = rule
                    .from_endpoints
                    .and_then(|e| e.into_iter().next())
                    .ok_or(WireError::UnknownIngressRule(i))?;
                rules.push(PolicyRule::IngressScoped { peers });
            }
        }

        Ok(PolicySpec {
            endpoint_selector: wire.endpoint_selector,
            rules,
        })
    }
}

fn egress_rule(index: usize, rule: WireEgressRule) -> Result<PolicyRule, WireError> {
    let first_endpoint = rule.to_endpoints.and_then(|e| e.into_iter().next());

    match (first_endpoint, rule.to_ports, rule.to_fqdns) {
        (None, None, Some(fqdns)) => Ok(PolicyRule::EgressFqdn {
            matches: fqdns
                .into_iter()
                .map(FqdnMatch::try_from)
                .collect::<Result<_, _>>()?,
        }),
        (Some(dns_server), Some(ports), None) => {
            let port_rule = ports.into_iter().next().ok_or(WireError::UnexpectedDnsPorts)?;
            if port_rule.ports != dns_ports() {
                return Err(WireError::UnexpectedDnsPorts);
            }
            let patterns = port_rule
                .rules
                .map(|r| r.dns)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|f| f.match_pattern)
                .collect();
            Ok(PolicyRule::EgressDns {
                dns_server,
                patterns,
            })
        }
        (Some(peers), None, None) => Ok(PolicyRule::EgressIntraSandbox { peers }),
        _ => Err(WireError::UnknownEgressRule(index)),
    }
}
