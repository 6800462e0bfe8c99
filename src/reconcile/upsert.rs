//! The idempotent fetch-or-create, else overwrite-and-update protocol.

use tracing::debug;

use super::error::UpsertError;
use crate::policy::NetworkPolicy;
use crate::resources::{Endpoint, Resource, Workload};
use crate::spec::Sandbox;
use crate::store::{self, OwnerLinker, ResourceStore};

/// A derived object whose mutable portion can be refreshed in place.
pub trait Converge: Resource {
    /// Copy the mutable portion of `desired` onto `self`. Identity
    /// metadata and status stay as stored.
    fn overwrite_mutable(&mut self, desired: Self);
}

impl Converge for Workload {
    fn overwrite_mutable(&mut self, desired: Self) {
        self.spec = desired.spec;
    }
}

impl Converge for Endpoint {
    fn overwrite_mutable(&mut self, desired: Self) {
        self.spec.selector = desired.spec.selector;
        self.spec.ports = desired.spec.ports;
    }
}

impl Converge for NetworkPolicy {
    fn overwrite_mutable(&mut self, desired: Self) {
        self.spec = desired.spec;
    }
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

/// Converge one derived object.
///
/// Absent: attach ownership to `owner`, then create. Present: check the
/// stored object is not controlled by another sandbox, overwrite the
/// mutable portion and update. The update is issued even when nothing
/// changed; the store treats that as a no-op.
pub async fn upsert<R, S, O>(
    store: &S,
    linker: &O,
    owner: &Sandbox,
    desired: R,
) -> Result<(R, UpsertAction), UpsertError>
where
    R: Converge,
    S: ResourceStore + ?Sized,
    O: OwnerLinker + ?Sized,
{
    let kind = R::KIND;
    let namespace = desired.metadata().namespace.clone();
    let name = desired.metadata().name.clone();

    match store::get_typed::<R, S>(store, &namespace, &name).await? {
        None => {
            let mut desired = desired;
            linker.attach_owner(desired.metadata_mut(), owner)?;
            let created = store.create(desired.into_object()).await?;
            debug!(%kind, %name, "created");
            Ok((store::expect_kind(created)?, UpsertAction::Created))
        }
        Some(mut current) => {
            // Derived names can collide across sandboxes; never take over
            // an object some other controller owns.
            linker.attach_owner(current.metadata_mut(), owner)?;
            let version = current.metadata().resource_version.clone();
            current.overwrite_mutable(desired);
            let updated: R = store::expect_kind(store.update(current.into_object()).await?)?;

            let action = if updated.metadata().resource_version == version {
                UpsertAction::Unchanged
            } else {
                UpsertAction::Updated
            };
            debug!(%kind, %name, ?action, "updated");
            Ok((updated, action))
        }
    }
}
