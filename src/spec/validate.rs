//! Spec validation, run before any store mutation.
//!
//! [`Sandbox::validate`] gates a whole pass; service checks fail only
//! the service they concern.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::{Sandbox, SandboxSpec, ServiceSpec};

/// Maximum length of a DNS label (RFC 1123).
const MAX_LABEL_LEN: usize = 63;

static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// Errors found in a sandbox spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{what} name {name:?} is not a valid DNS label")]
    InvalidName { what: &'static str, name: String },

    #[error("service {service} has no image")]
    MissingImage { service: String },

    #[error("service {service} references undeclared network {network}")]
    UndeclaredNetwork { service: String, network: String },

    #[error("service {service} mounts undeclared volume {volume}")]
    UndeclaredVolume { service: String, volume: String },
}

/// Check that `name` is a lowercase RFC 1123 label.
pub fn is_dns_label(name: &str) -> bool {
    name.len() <= MAX_LABEL_LEN && DNS_LABEL.is_match(name)
}

fn check_name(what: &'static str, name: &str) -> Result<(), ValidationError> {
    if is_dns_label(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            what,
            name: name.to_string(),
        })
    }
}

impl Sandbox {
    /// Sandbox-wide checks: identity, network names and volume names.
    ///
    /// These gate the whole pass. The name and namespace end up in file
    /// paths and in every derived name, so they must be labels too.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_identity()?;
        self.spec.validate_networks()?;
        self.spec
            .volumes
            .keys()
            .try_for_each(|name| self.spec.validate_volume(name))
    }

    /// Name and namespace only.
    pub fn validate_identity(&self) -> Result<(), ValidationError> {
        check_name("sandbox", self.name())?;
        check_name("namespace", self.namespace())
    }
}

impl SandboxSpec {
    /// Validate one service against the rest of the spec.
    ///
    /// The derived object name `{sandbox}-{service}` must itself be a
    /// label, since it names the workload and its discovery endpoint.
    pub fn validate_service(
        &self,
        sandbox_name: &str,
        service_name: &str,
        service: &ServiceSpec,
    ) -> Result<(), ValidationError> {
        check_name("service", service_name)?;
        check_name("workload", &format!("{sandbox_name}-{service_name}"))?;

        if service.image.trim().is_empty() {
            return Err(ValidationError::MissingImage {
                service: service_name.to_string(),
            });
        }

        if let Some(network) = service
            .networks
            .iter()
            .find(|n| !self.networks.contains_key(n.as_str()))
        {
            return Err(ValidationError::UndeclaredNetwork {
                service: service_name.to_string(),
                network: network.clone(),
            });
        }

        if let Some(volume) = service
            .volumes
            .iter()
            .find(|v| !self.volumes.contains_key(v.as_str()))
        {
            return Err(ValidationError::UndeclaredVolume {
                service: service_name.to_string(),
                volume: volume.clone(),
            });
        }

        Ok(())
    }

    /// Validate the sandbox-wide names used by the policy builder.
    pub fn validate_networks(&self) -> Result<(), ValidationError> {
        self.networks
            .keys()
            .try_for_each(|name| check_name("network", name))
    }

    /// Validate one volume name.
    pub fn validate_volume(&self, name: &str) -> Result<(), ValidationError> {
        check_name("volume", name)
    }
}
