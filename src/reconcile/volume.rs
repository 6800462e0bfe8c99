//! Volume Provisioner contract.
//!
//! Provisioning is declarative only for now: the default provisioner
//! derives the claim a real provisioner would create and logs it.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::builder::build_volume_claim;
use crate::config::OperatorConfig;
use crate::spec::{Sandbox, VolumeSpec};

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume provisioning failed: {0}")]
    Provision(String),
}

/// Ensures the persistent claim for one sandbox volume exists.
///
/// Implementations must be idempotent and name the claim
/// `{sandbox}-{volume}`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolumeProvisioner: Send + Sync {
    async fn ensure_volume(
        &self,
        sandbox: &Sandbox,
        volume_name: &str,
        volume: &VolumeSpec,
    ) -> Result<(), VolumeError>;
}

/// Provisioner that records what it would create and creates nothing.
#[derive(Debug, Clone, Default)]
pub struct DeclarativeOnly {
    config: OperatorConfig,
}

impl DeclarativeOnly {
    pub fn new(config: OperatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl VolumeProvisioner for DeclarativeOnly {
    async fn ensure_volume(
        &self,
        sandbox: &Sandbox,
        volume_name: &str,
        volume: &VolumeSpec,
    ) -> Result<(), VolumeError> {
        let claim = build_volume_claim(sandbox, volume_name, volume, &self.config);
        debug!(
            claim = %claim.metadata.name,
            size = %volume.size,
            storage_class = ?claim.spec.storage_class_name,
            "volume is declarative only; no claim provisioned"
        );
        Ok(())
    }
}
