//! CLI subcommand: `sandbox-operator config`
//!
//! Every edit goes through [`Config::validate`], so the file on disk is
//! always one the controller will start with.

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(short, long, value_enum, default_value_t = Format::Toml)]
        format: Format,
    },

    /// Print one value (e.g. operator.dns.cluster_domain)
    Get { key: String },

    /// Change one value and save, refusing values the controller would reject
    Set { key: String, value: String },

    /// Print the config file location
    Path,

    /// Write the commented default config
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the config and print the settings the controller derives
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Toml,
    Json,
}

pub async fn run(args: ConfigArgs, explicit: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => {
            let config = Config::load(explicit)?;
            println!("{}", render(&config, format)?);
        }
        ConfigCommands::Get { key } => {
            println!("{}", Config::load(explicit)?.get_value(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load(explicit)?;
            config.set_value(&key, &value)?;
            config.save()?;
            println!("{key} = {value}");
        }
        ConfigCommands::Path => println!("{}", config_file(explicit)?.display()),
        ConfigCommands::Init { force } => {
            let file = config_file(explicit)?;
            write_template(&file, force)?;
            println!("Wrote {}", file.display());
        }
        ConfigCommands::Check => {
            let config = Config::load(explicit)?;
            print!("{}", summary(&config)?);
        }
    }
    Ok(())
}

fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path(),
    }
}

fn render(config: &Config, format: Format) -> Result<String> {
    Ok(match format {
        Format::Toml => toml::to_string_pretty(config)?,
        Format::Json => serde_json::to_string_pretty(config)?,
    })
}

/// Write the default template to `file`. The template is parsed first so
/// a broken build never lays down a config the controller rejects.
fn write_template(file: &Path, force: bool) -> Result<()> {
    if file.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to replace it)",
            file.display()
        );
    }
    Config::from_toml(DEFAULT_CONFIG_TEMPLATE).context("default config template is invalid")?;

    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    std::fs::write(file, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("cannot write {}", file.display()))
}

/// What the controller will actually run with.
fn summary(config: &Config) -> Result<String> {
    config.validate()?;
    let (retry_base, retry_max) = config.retry_bounds()?;
    Ok(format!(
        "namespace:  {}\nstore:      {}\nprune:      {}\nresync:     {:?}\nretry:      {:?} .. {:?}\n",
        config.reconcile.namespace,
        config.store_path().display(),
        config.reconcile.prune_orphans,
        config.resync_interval()?,
        retry_base,
        retry_max,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_init_writes_loadable_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested/config.toml");

        write_template(&file, false).unwrap();
        let config = Config::load(Some(&file)).unwrap();
        assert_eq!(config.resync_interval().unwrap(), Duration::from_secs(300));

        let err = write_template(&file, false).unwrap_err();
        assert!(err.to_string().contains("--force"), "{err}");
        write_template(&file, true).unwrap();
    }

    #[test]
    fn test_summary_reports_derived_settings() {
        let mut config = Config::default();
        config.set_value("store.path", "/srv/sandboxes").unwrap();
        config.set_value("reconcile.retry_base", "500ms").unwrap();

        let text = summary(&config).unwrap();
        assert!(text.contains("store:      /srv/sandboxes"), "{text}");
        assert!(text.contains("resync:     300s"), "{text}");
        assert!(text.contains("retry:      500ms .. 300s"), "{text}");
    }

    #[test]
    fn test_summary_rejects_invalid_config() {
        let mut config = Config::default();
        config.reconcile.retry_max = "never".to_string();
        assert!(summary(&config).is_err());
    }

    #[test]
    fn test_render_formats() {
        let config = Config::default();
        let json: serde_json::Value =
            serde_json::from_str(&render(&config, Format::Json).unwrap()).unwrap();
        assert_eq!(json["operator"]["dns"]["app_label"], "kube-dns");

        let toml = render(&config, Format::Toml).unwrap();
        assert!(toml.contains("[operator.dns]"), "{toml}");
    }
}
