//! sandbox-operator: a control loop for multi-service, network-isolated
//! sandboxes.
//!
//! A [`spec::Sandbox`] declares services, logical networks, volumes and an
//! egress allow-list. The [`reconcile::Reconciler`] derives workloads,
//! discovery endpoints and network policies from it, converges them in a
//! [`store::ResourceStore`] with create-or-update semantics, and writes
//! per-service readiness back to the sandbox status. The
//! [`controller::Controller`] drives passes with dedup, retry and resync.

pub mod builder;
pub mod cli;
pub mod config;
pub mod controller;
pub mod paths;
pub mod policy;
pub mod reconcile;
pub mod resources;
pub mod spec;
pub mod store;

pub use config::Config;
