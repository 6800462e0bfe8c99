//! Headless discovery endpoint for one service.

use serde::{Deserialize, Serialize};

use super::ObjectMeta;
use super::labels::Labels;

/// Cluster IP value that makes an endpoint headless.
pub const HEADLESS_CLUSTER_IP: &str = "None";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: EndpointSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,

    pub selector: Labels,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<EndpointPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

impl Endpoint {
    pub fn is_headless(&self) -> bool {
        self.spec.cluster_ip == HEADLESS_CLUSTER_IP
    }
}
