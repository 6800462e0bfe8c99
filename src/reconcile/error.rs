use thiserror::Error;

use super::Phase;
use super::volume::VolumeError;
use crate::spec::ValidationError;
use crate::store::{OwnershipError, StoreError};

/// Failure of a single fetch-or-create / update step.
#[derive(Debug, Error)]
pub enum UpsertError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to set owner: {0}")]
    Ownership(#[from] OwnershipError),
}

/// Failure isolated to one service. Siblings still converge.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service spec: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to reconcile workload: {0}")]
    Workload(#[source] UpsertError),

    #[error("failed to reconcile discovery endpoint: {0}")]
    Endpoint(#[source] UpsertError),
}

#[derive(Debug, Error)]
#[error("{service}: {error}")]
pub struct ServiceFailure {
    pub service: String,
    #[source]
    pub error: ServiceError,
}

/// Failure of a whole pass, returned to the dispatcher.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load sandbox: {0}")]
    Load(#[source] StoreError),

    #[error("failed to reconcile volume {volume}: {source}")]
    Volume {
        volume: String,
        #[source]
        source: VolumeError,
    },

    #[error("invalid sandbox spec: {0}")]
    InvalidSpec(#[source] ValidationError),

    #[error("failed to reconcile policy {policy}: {source}")]
    Policy {
        policy: String,
        #[source]
        source: UpsertError,
    },

    #[error("failed to prune orphaned objects: {0}")]
    Prune(#[source] StoreError),

    #[error("failed to write sandbox status: {0}")]
    Status(#[source] StoreError),

    #[error("{} service(s) failed: {}", .0.len(), join_failures(.0))]
    Services(Vec<ServiceFailure>),
}

fn join_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Phase the pass was in when it failed.
    pub fn phase(&self) -> Phase {
        match self {
            ReconcileError::Load(_) | ReconcileError::InvalidSpec(_) => Phase::Load,
            ReconcileError::Volume { .. } => Phase::ReconcileVolumes,
            ReconcileError::Services(_) => Phase::ReconcileServices,
            ReconcileError::Policy { .. } => Phase::ReconcilePolicies,
            ReconcileError::Prune(_) => Phase::Prune,
            ReconcileError::Status(_) => Phase::UpdateStatus,
        }
    }
}
