use std::collections::BTreeMap;

use crate::config::OperatorConfig;
use crate::resources::labels;
use crate::resources::{ClaimResources, ClaimSpec, ObjectMeta, VolumeClaim};
use crate::spec::{Sandbox, VolumeSpec};

use super::volume_claim_name;

pub const CLAIM_API_VERSION: &str = "v1";
pub const CLAIM_KIND: &str = "PersistentVolumeClaim";

/// Sandbox volumes are mounted by a single service replica.
pub const VOLUME_ACCESS_MODE: &str = "ReadWriteOnce";

/// Build the persistent claim definition for one sandbox volume.
pub fn build_volume_claim(
    sandbox: &Sandbox,
    volume_name: &str,
    volume: &VolumeSpec,
    config: &OperatorConfig,
) -> VolumeClaim {
    let mut requests = BTreeMap::new();
    if !volume.size.is_empty() {
        requests.insert("storage".to_string(), volume.size.clone());
    }

    VolumeClaim {
        api_version: CLAIM_API_VERSION.to_string(),
        kind: CLAIM_KIND.to_string(),
        metadata: ObjectMeta {
            labels: labels::managed_labels(config, sandbox.name()),
            ..ObjectMeta::named(
                sandbox.namespace(),
                &volume_claim_name(sandbox.name(), volume_name),
            )
        },
        spec: ClaimSpec {
            access_modes: vec![VOLUME_ACCESS_MODE.to_string()],
            storage_class_name: volume.storage_class.clone(),
            resources: ClaimResources { requests },
        },
    }
}
