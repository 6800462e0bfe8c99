//! Derived object definitions and the metadata they share.
//!
//! Every object the control loop writes is one of the [`Object`] variants.
//! The typed structs implement [`Resource`] so the engine can fetch and
//! upsert them generically.

mod claim;
mod endpoint;
pub mod labels;
mod workload;

pub use claim::{ClaimResources, ClaimSpec, VolumeClaim};
pub use endpoint::{Endpoint, EndpointPort, EndpointSpec, HEADLESS_CLUSTER_IP};
pub use workload::{
    Container, LabelSelector, PodSpec, PodTemplate, TemplateMeta, Workload, WorkloadSpec,
    WorkloadStatus,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::policy::NetworkPolicy;
use crate::spec::Sandbox;

/// Identity and bookkeeping metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Assigned by the store on every effective write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// The controlling owner reference, if any.
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|r| r.controller == Some(true))
    }

    /// Whether the object is controlled by the owner with `uid`.
    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller().is_some_and(|r| r.uid == uid)
    }
}

/// Link from a derived object to the sandbox that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

/// Object kinds known to the store. The mapping from kind to wire shape
/// is static; there is no runtime type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Sandbox,
    Workload,
    Endpoint,
    NetworkPolicy,
    VolumeClaim,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Sandbox,
        Kind::Workload,
        Kind::Endpoint,
        Kind::NetworkPolicy,
        Kind::VolumeClaim,
    ];

    /// Stable plural name, used for directory names and log fields.
    pub fn plural(self) -> &'static str {
        match self {
            Kind::Sandbox => "sandboxes",
            Kind::Workload => "workloads",
            Kind::Endpoint => "endpoints",
            Kind::NetworkPolicy => "networkpolicies",
            Kind::VolumeClaim => "volumeclaims",
        }
    }

    /// Decode a JSON document of this kind.
    pub fn decode(self, bytes: &[u8]) -> serde_json::Result<Object> {
        Ok(match self {
            Kind::Sandbox => Object::Sandbox(serde_json::from_slice(bytes)?),
            Kind::Workload => Object::Workload(serde_json::from_slice(bytes)?),
            Kind::Endpoint => Object::Endpoint(serde_json::from_slice(bytes)?),
            Kind::NetworkPolicy => Object::NetworkPolicy(serde_json::from_slice(bytes)?),
            Kind::VolumeClaim => Object::VolumeClaim(serde_json::from_slice(bytes)?),
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Any object held by the resource store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Object {
    Sandbox(Sandbox),
    Workload(Workload),
    Endpoint(Endpoint),
    NetworkPolicy(NetworkPolicy),
    VolumeClaim(VolumeClaim),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Sandbox(_) => Kind::Sandbox,
            Object::Workload(_) => Kind::Workload,
            Object::Endpoint(_) => Kind::Endpoint,
            Object::NetworkPolicy(_) => Kind::NetworkPolicy,
            Object::VolumeClaim(_) => Kind::VolumeClaim,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Object::Sandbox(o) => &o.metadata,
            Object::Workload(o) => &o.metadata,
            Object::Endpoint(o) => &o.metadata,
            Object::NetworkPolicy(o) => &o.metadata,
            Object::VolumeClaim(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Object::Sandbox(o) => &mut o.metadata,
            Object::Workload(o) => &mut o.metadata,
            Object::Endpoint(o) => &mut o.metadata,
            Object::NetworkPolicy(o) => &mut o.metadata,
            Object::VolumeClaim(o) => &mut o.metadata,
        }
    }
}

/// A typed object that can travel through the store as an [`Object`].
pub trait Resource: Clone + Send + Sync + Sized + 'static {
    const KIND: Kind;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
    fn into_object(self) -> Object;
    fn from_object(object: Object) -> Option<Self>;
}

macro_rules! impl_resource {
    ($ty:ty, $variant:ident) => {
        impl Resource for $ty {
            const KIND: Kind = Kind::$variant;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn into_object(self) -> Object {
                Object::$variant(self)
            }

            fn from_object(object: Object) -> Option<Self> {
                match object {
                    Object::$variant(o) => Some(o),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(Sandbox, Sandbox);
impl_resource!(Workload, Workload);
impl_resource!(Endpoint, Endpoint);
impl_resource!(NetworkPolicy, NetworkPolicy);
impl_resource!(VolumeClaim, VolumeClaim);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SandboxSpec;

    #[test]
    fn test_object_roundtrip_through_kind() {
        let sandbox = Sandbox::new("ns", "box", SandboxSpec::default());
        let object = sandbox.clone().into_object();
        assert_eq!(object.kind(), Kind::Sandbox);

        let bytes = serde_json::to_vec(&object).unwrap();
        let decoded = Kind::Sandbox.decode(&bytes).unwrap();
        assert_eq!(Sandbox::from_object(decoded), Some(sandbox));
    }

    #[test]
    fn test_from_object_rejects_other_kinds() {
        let object = Sandbox::new("ns", "box", SandboxSpec::default()).into_object();
        assert!(Workload::from_object(object).is_none());
    }

    #[test]
    fn test_controller_reference_lookup() {
        let mut meta = ObjectMeta::named("ns", "box-web");
        meta.owner_references.push(OwnerReference {
            api_version: "v1".to_string(),
            kind: "Other".to_string(),
            name: "other".to_string(),
            uid: "uid-other".to_string(),
            controller: None,
            block_owner_deletion: None,
        });
        assert!(!meta.is_controlled_by("uid-other"));

        meta.owner_references[0].controller = Some(true);
        assert!(meta.is_controlled_by("uid-other"));
        assert!(!meta.is_controlled_by("uid-box"));
    }
}
