//! Resource Builder: pure derivation of per-service objects from a spec.
//!
//! Every function here is deterministic. The upsert protocol relies on
//! this to make a second pass over an unchanged spec a no-op.

mod claim;
mod endpoint;
mod workload;

pub use claim::{VOLUME_ACCESS_MODE, build_volume_claim};
pub use endpoint::build_discovery_endpoint;
pub use workload::{build_workload, normalize_runtime_class, workload_labels};

/// Name of the workload and discovery endpoint of `service`.
pub fn workload_name(sandbox: &str, service: &str) -> String {
    format!("{sandbox}-{service}")
}

/// Name of the persistent claim backing `volume`.
pub fn volume_claim_name(sandbox: &str, volume: &str) -> String {
    format!("{sandbox}-{volume}")
}

/// Governing service name carried by a workload.
pub fn governing_service_name(service: &str) -> String {
    format!("{service}-service")
}
