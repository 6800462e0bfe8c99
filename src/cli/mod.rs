pub mod apply;
pub mod config;
pub mod paths;
pub mod render;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::spec::Sandbox;
use crate::store::FileStore;

#[derive(Parser)]
#[command(name = "sandbox-operator")]
#[command(
    author,
    version,
    about = "Converge network-isolated, multi-service sandboxes toward their spec"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "SANDBOX_OPERATOR_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a sandbox manifest and reconcile it once
    Apply(apply::ApplyArgs),

    /// Print the objects a manifest derives, without touching the store
    Render(render::RenderArgs),

    /// Show the recorded status of a sandbox
    Status(status::StatusArgs),

    /// Run the controller until interrupted
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show where the config file and the store live
    Paths,
}

/// Parse a YAML sandbox manifest, defaulting its namespace.
pub fn load_manifest(path: &Path, default_namespace: &str) -> Result<Sandbox> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse_manifest(&content, default_namespace)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))
}

pub fn parse_manifest(content: &str, default_namespace: &str) -> Result<Sandbox> {
    let mut sandbox: Sandbox = serde_yaml::from_str(content)?;
    if sandbox.metadata.name.is_empty() {
        anyhow::bail!("manifest has no metadata.name");
    }
    if sandbox.metadata.namespace.is_empty() {
        sandbox.metadata.namespace = default_namespace.to_string();
    }
    // Both become directories of the file store.
    sandbox.validate_identity()?;
    // Identity and status belong to the store.
    sandbox.metadata.uid = None;
    sandbox.metadata.resource_version = None;
    sandbox.status = Default::default();
    Ok(sandbox)
}

pub(crate) fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    config.paths.ensure_dirs()?;
    Ok(Arc::new(FileStore::new(config.store_path())))
}
