//! Ownership linkage from derived objects to their sandbox.
//!
//! Deleting a sandbox cascades to everything it controls. The cascade
//! itself is the cluster's garbage collector; this module only writes the
//! reference.

use thiserror::Error;

use crate::resources::{ObjectMeta, OwnerReference};
use crate::spec::Sandbox;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("owner {name} has no uid yet")]
    MissingUid { name: String },

    #[error("cannot own {child} in namespace {child_namespace} from namespace {owner_namespace}")]
    CrossNamespace {
        child: String,
        child_namespace: String,
        owner_namespace: String,
    },

    #[error("{child} is already controlled by {kind} {owner}")]
    AlreadyOwned {
        child: String,
        kind: String,
        owner: String,
    },
}

/// Attaches ownership of a child object to a sandbox.
#[cfg_attr(test, mockall::automock)]
pub trait OwnerLinker: Send + Sync {
    fn attach_owner(&self, child: &mut ObjectMeta, owner: &Sandbox) -> Result<(), OwnershipError>;
}

/// Writes a controller owner reference that blocks owner deletion until
/// the child is collected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerReference;

impl OwnerLinker for ControllerReference {
    fn attach_owner(&self, child: &mut ObjectMeta, owner: &Sandbox) -> Result<(), OwnershipError> {
        let uid = owner
            .metadata
            .uid
            .as_deref()
            .ok_or_else(|| OwnershipError::MissingUid {
                name: owner.name().to_string(),
            })?;

        if child.namespace != owner.namespace() {
            return Err(OwnershipError::CrossNamespace {
                child: child.name.clone(),
                child_namespace: child.namespace.clone(),
                owner_namespace: owner.namespace().to_string(),
            });
        }

        match child.controller() {
            Some(existing) if existing.uid == uid => return Ok(()),
            Some(existing) => {
                return Err(OwnershipError::AlreadyOwned {
                    child: child.name.clone(),
                    kind: existing.kind.clone(),
                    owner: existing.name.clone(),
                });
            }
            None => {}
        }

        child.owner_references.push(OwnerReference {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name().to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        });
        Ok(())
    }
}
