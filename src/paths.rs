//! Where the operator keeps its config file and its file-backed store.
//!
//! Each directory comes from an operator variable when that names an
//! absolute path, else from the platform's XDG location via `etcetera`.

use anyhow::{Context, Result};
use etcetera::BaseStrategy;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "sandbox-operator";

pub const CONFIG_DIR_VAR: &str = "SANDBOX_OPERATOR_CONFIG_DIR";
pub const STATE_DIR_VAR: &str = "SANDBOX_OPERATOR_STATE_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Holds `config.toml`
    pub config_dir: PathBuf,

    /// Holds the default store
    pub state_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self> {
        Self::from_lookup(|var| std::env::var_os(var))
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let base = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("cannot locate the home directory: {e}"))?;

        let config_dir = absolute(lookup(CONFIG_DIR_VAR))
            .unwrap_or_else(|| base.config_dir().join(APP_DIR));
        let state_dir = absolute(lookup(STATE_DIR_VAR)).unwrap_or_else(|| {
            base.state_dir()
                .unwrap_or_else(|| base.data_dir())
                .join(APP_DIR)
        });

        Ok(Self {
            config_dir,
            state_dir,
        })
    }

    /// Both directories under one root, as `config/` and `state/`.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            state_dir: root.join("state"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Store root unless `store.path` overrides it.
    pub fn store_dir(&self) -> PathBuf {
        self.state_dir.join("store")
    }

    /// Create both directories, private to the current user.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.state_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                    .with_context(|| format!("cannot restrict {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| Self::under(Path::new(APP_DIR)))
    }
}

/// Empty and relative values do not count as set.
fn absolute(value: Option<OsString>) -> Option<PathBuf> {
    value.map(PathBuf::from).filter(|p| p.is_absolute())
}
