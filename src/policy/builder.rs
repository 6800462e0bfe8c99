//! Pure builders for the sandbox's policy documents.

use super::rules::{EndpointSelector, FqdnMatch, PolicyRule};
use super::{NetworkPolicy, POLICY_API_VERSION, POLICY_KIND, PolicySpec};
use crate::config::OperatorConfig;
use crate::resources::ObjectMeta;
use crate::resources::labels::{self, Labels};
use crate::spec::Sandbox;

/// Namespace label the enforcement agent attaches to every endpoint.
const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";

/// Label identifying the cluster DNS pods.
const DNS_APP_LABEL: &str = "k8s-app";

pub fn egress_policy_name(sandbox: &str) -> String {
    format!("{sandbox}-egress")
}

pub fn default_deny_policy_name(sandbox: &str) -> String {
    format!("{sandbox}-default-deny-ingress")
}

pub fn network_policy_name(sandbox: &str, network: &str) -> String {
    format!("{sandbox}-network-{network}-ingress")
}

fn policy(sandbox: &Sandbox, name: String, labels: Labels, spec: PolicySpec) -> NetworkPolicy {
    NetworkPolicy {
        api_version: POLICY_API_VERSION.to_string(),
        kind: POLICY_KIND.to_string(),
        metadata: ObjectMeta {
            labels,
            ..ObjectMeta::named(sandbox.namespace(), &name)
        },
        spec,
    }
}

/// DNS lookup patterns for the egress DNS rule.
///
/// Without an allow-list lookups are unrestricted. With one, lookups are
/// limited to the allowed names, their subdomains, and the cluster domain
/// so that services can still resolve each other.
pub fn dns_patterns(allow_domains: &[String], cluster_domain: &str) -> Vec<String> {
    if allow_domains.is_empty() {
        return vec!["*".to_string()];
    }

    let mut patterns = Vec::with_capacity(allow_domains.len() * 2 + 1);
    for domain in allow_domains {
        patterns.push(domain.clone());
        patterns.push(format!("*.{domain}"));
    }
    if !cluster_domain.is_empty() {
        patterns.push(format!("*.{cluster_domain}"));
    }
    patterns
}

fn dns_server_selector(config: &OperatorConfig) -> EndpointSelector {
    EndpointSelector::new(Labels::from([
        (
            POD_NAMESPACE_LABEL.to_string(),
            config.dns.namespace.clone(),
        ),
        (DNS_APP_LABEL.to_string(), config.dns.app_label.clone()),
    ]))
}

/// Egress policy: DNS, intra-sandbox traffic and, if any, allow-listed names.
pub fn build_sandbox_egress_policy(sandbox: &Sandbox, config: &OperatorConfig) -> NetworkPolicy {
    let name = sandbox.name();
    let allow = &sandbox.spec.allow_domains;

    let mut rules = vec![
        PolicyRule::EgressDns {
            dns_server: dns_server_selector(config),
            patterns: dns_patterns(allow, &config.dns.cluster_domain),
        },
        PolicyRule::EgressIntraSandbox {
            peers: EndpointSelector::new(labels::sandbox_selector(name)),
        },
    ];

    if !allow.is_empty() {
        let matches = allow
            .iter()
            .flat_map(|domain| {
                [
                    FqdnMatch::Name(domain.clone()),
                    FqdnMatch::Pattern(format!("*.{domain}")),
                ]
            })
            .collect();
        rules.push(PolicyRule::EgressFqdn { matches });
    }

    policy(
        sandbox,
        egress_policy_name(name),
        labels::managed_labels(config, name),
        PolicySpec {
            endpoint_selector: EndpointSelector::new(labels::sandbox_selector(name)),
            rules,
        },
    )
}

/// Default-deny ingress: selects the whole sandbox and admits nothing.
pub fn build_default_deny_ingress_policy(
    sandbox: &Sandbox,
    config: &OperatorConfig,
) -> NetworkPolicy {
    let name = sandbox.name();
    policy(
        sandbox,
        default_deny_policy_name(name),
        labels::managed_labels(config, name),
        PolicySpec {
            endpoint_selector: EndpointSelector::new(labels::sandbox_selector(name)),
            rules: vec![PolicyRule::IngressDefaultDeny],
        },
    )
}

/// Ingress for one logical network: members admit traffic from members.
pub fn build_network_ingress_policy(
    sandbox: &Sandbox,
    network: &str,
    config: &OperatorConfig,
) -> NetworkPolicy {
    let name = sandbox.name();
    let members = EndpointSelector::new(labels::network_selector(name, network));

    let mut meta_labels = labels::managed_labels(config, name);
    meta_labels.insert(labels::NETWORK.to_string(), network.to_string());

    policy(
        sandbox,
        network_policy_name(name, network),
        meta_labels,
        PolicySpec {
            endpoint_selector: members.clone(),
            rules: vec![PolicyRule::IngressScoped { peers: members }],
        },
    )
}

/// Every policy document for `sandbox`, in reconciliation order.
pub fn build_policies(sandbox: &Sandbox, config: &OperatorConfig) -> Vec<NetworkPolicy> {
    let mut policies = vec![
        build_sandbox_egress_policy(sandbox, config),
        build_default_deny_ingress_policy(sandbox, config),
    ];
    policies.extend(
        sandbox
            .spec
            .networks
            .keys()
            .map(|network| build_network_ingress_policy(sandbox, network, config)),
    );
    policies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ingress_allowed;
    use crate::spec::SandboxSpec;
    use serde_json::json;

    fn sandbox(spec: SandboxSpec) -> Sandbox {
        Sandbox::new("agents", "box", spec)
    }

    fn fqdn_rules(policy: &NetworkPolicy) -> Vec<FqdnMatch> {
        policy
            .spec
            .rules
            .iter()
            .filter_map(|r| match r {
                PolicyRule::EgressFqdn { matches } => Some(matches.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(egress_policy_name("box"), "box-egress");
        assert_eq!(default_deny_policy_name("box"), "box-default-deny-ingress");
        assert_eq!(network_policy_name("box", "a"), "box-network-a-ingress");
    }

    #[test]
    fn test_default_isolation_without_allow_list() {
        let config = OperatorConfig::default();
        let policy = build_sandbox_egress_policy(&sandbox(SandboxSpec::default()), &config);

        assert_eq!(policy.spec.rules.len(), 2);
        assert!(fqdn_rules(&policy).is_empty());
        assert_eq!(
            policy.spec.rules[0],
            PolicyRule::EgressDns {
                dns_server: dns_server_selector(&config),
                patterns: vec!["*".to_string()],
            }
        );
        assert_eq!(
            policy.spec.rules[1],
            PolicyRule::EgressIntraSandbox {
                peers: EndpointSelector::new(labels::sandbox_selector("box")),
            }
        );
    }

    #[test]
    fn test_allow_list_expansion() {
        let spec = SandboxSpec {
            allow_domains: vec!["example.com".to_string()],
            ..Default::default()
        };
        let policy =
            build_sandbox_egress_policy(&sandbox(spec), &OperatorConfig::default());

        assert_eq!(policy.spec.rules.len(), 3);
        assert_eq!(
            fqdn_rules(&policy),
            vec![
                FqdnMatch::Name("example.com".to_string()),
                FqdnMatch::Pattern("*.example.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_dns_patterns_follow_allow_list() {
        assert_eq!(dns_patterns(&[], "cluster.local"), vec!["*"]);
        assert_eq!(
            dns_patterns(&["pypi.org".to_string()], "cluster.local"),
            vec!["pypi.org", "*.pypi.org", "*.cluster.local"]
        );
    }

    #[test]
    fn test_egress_document_matches_agent_shape() {
        let policy = build_sandbox_egress_policy(
            &sandbox(SandboxSpec::default()),
            &OperatorConfig::default(),
        );
        let value = serde_json::to_value(&policy).unwrap();

        assert_eq!(value["apiVersion"], "cilium.io/v2");
        assert_eq!(value["kind"], "CiliumNetworkPolicy");
        assert_eq!(value["metadata"]["name"], "box-egress");
        assert_eq!(value["metadata"]["namespace"], "agents");
        assert_eq!(
            value["spec"]["egress"][0]["toEndpoints"],
            json!([{"matchLabels": {
                "io.kubernetes.pod.namespace": "kube-system",
                "k8s-app": "kube-dns"
            }}])
        );
        assert!(value["spec"].get("ingress").is_none());
    }

    #[test]
    fn test_default_deny_always_emits_ingress_field() {
        let policy = build_default_deny_ingress_policy(
            &sandbox(SandboxSpec::default()),
            &OperatorConfig::default(),
        );
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["spec"]["ingress"], json!([]));
        assert!(value["spec"].get("egress").is_none());
    }

    #[test]
    fn test_network_policy_selects_members_only() {
        let policy =
            build_network_ingress_policy(&sandbox(SandboxSpec::default()), "a", &OperatorConfig::default());

        assert_eq!(policy.metadata.labels[labels::NETWORK], "a");
        assert_eq!(
            policy.spec.endpoint_selector.match_labels,
            labels::network_selector("box", "a")
        );
        assert_eq!(
            policy.spec.rules,
            vec![PolicyRule::IngressScoped {
                peers: EndpointSelector::new(labels::network_selector("box", "a")),
            }]
        );
    }

    #[test]
    fn test_network_segmentation() {
        let mut spec = SandboxSpec::default();
        spec.networks.insert("a".to_string(), String::new());
        spec.networks.insert("b".to_string(), String::new());
        let policies = build_policies(&sandbox(spec), &OperatorConfig::default());
        assert_eq!(policies.len(), 4);

        let in_a = labels::network_selector("box", "a");
        let in_b = labels::network_selector("box", "b");
        let mut in_both = in_a.clone();
        in_both.extend(in_b.clone());

        let network_a = &policies[2].spec;
        assert!(network_a.admits_ingress_from(&in_a));
        assert!(!network_a.admits_ingress_from(&in_b));

        assert!(ingress_allowed(&policies, &in_a, &in_a));
        assert!(!ingress_allowed(&policies, &in_a, &in_b));
        assert!(ingress_allowed(&policies, &in_both, &in_b));
        // Pods in no network accept nothing.
        let bare = labels::sandbox_selector("box");
        assert!(!ingress_allowed(&policies, &bare, &in_a));
    }

    #[test]
    fn test_builders_are_deterministic() {
        let mut spec = SandboxSpec {
            allow_domains: vec!["a.org".to_string(), "b.org".to_string()],
            ..Default::default()
        };
        spec.networks.insert("x".to_string(), String::new());
        spec.networks.insert("y".to_string(), String::new());
        let sb = sandbox(spec);
        let config = OperatorConfig::default();

        let first = serde_json::to_vec(&build_policies(&sb, &config)).unwrap();
        let second = serde_json::to_vec(&build_policies(&sb, &config)).unwrap();
        assert_eq!(first, second);
    }
}
