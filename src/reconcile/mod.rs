//! Convergence Engine.
//!
//! One [`Reconciler::reconcile`] call is one pass:
//! `Load -> ReconcileVolumes -> ReconcileServices -> ReconcilePolicies ->
//! Prune -> UpdateStatus -> Done`. Every derived object goes through the
//! same [`upsert`] protocol, keyed by a deterministic name, so repeating a
//! pass over an unchanged spec changes nothing.

mod engine;
mod error;
mod prune;
pub mod status;
mod upsert;
pub mod volume;

pub use engine::{Changes, PassOutcome, PassReport, Phase, Reconciler};
pub use error::{ReconcileError, ServiceError, ServiceFailure, UpsertError};
pub use prune::{DesiredNames, prune_orphans};
pub use status::{Readiness, StatusAggregator};
pub use upsert::{Converge, UpsertAction, upsert};
pub use volume::{DeclarativeOnly, VolumeError, VolumeProvisioner};
