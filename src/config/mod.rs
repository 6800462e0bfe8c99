use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// Path the config was loaded from (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub operator: OperatorConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Values stamped into every derived object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Value of the `app.kubernetes.io/managed-by` label
    #[serde(default = "default_managed_by")]
    pub managed_by: String,

    /// Value of the `app.kubernetes.io/name` label
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Environment variable that tells each container its sandbox name
    #[serde(default = "default_sandbox_env_var")]
    pub sandbox_env_var: String,

    /// Runtime class value meaning "use the cluster default"
    #[serde(default = "default_runtime_class_sentinel")]
    pub runtime_class_default_sentinel: String,

    /// Replicas per service workload
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    pub dns: DnsConfig,
}

/// Where the cluster DNS service lives, for the egress DNS rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_dns_namespace")]
    pub namespace: String,

    /// Value of the DNS pods' `k8s-app` label
    #[serde(default = "default_dns_app_label")]
    pub app_label: String,

    /// Cluster-internal domain; lookups under it stay allowed when the
    /// sandbox has an allow-list
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Namespace watched by `run`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Delete derived objects whose names left the spec
    #[serde(default = "default_true")]
    pub prune_orphans: bool,

    /// Re-enqueue every sandbox at this interval (e.g. "5m")
    #[serde(default = "default_resync_interval")]
    pub resync_interval: String,

    /// First retry delay after a failed pass
    #[serde(default = "default_retry_base")]
    pub retry_base: String,

    /// Upper bound on the retry delay
    #[serde(default = "default_retry_max")]
    pub retry_max: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the file-backed store (default: state_dir/store)
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_managed_by() -> String {
    "sandbox-operator".to_string()
}
fn default_app_name() -> String {
    "inspectsandbox".to_string()
}
fn default_sandbox_env_var() -> String {
    "AGENT_ENV".to_string()
}
fn default_runtime_class_sentinel() -> String {
    "CLUSTER_DEFAULT".to_string()
}
fn default_replicas() -> i32 {
    1
}
fn default_dns_namespace() -> String {
    "kube-system".to_string()
}
fn default_dns_app_label() -> String {
    "kube-dns".to_string()
}
fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_true() -> bool {
    true
}
fn default_resync_interval() -> String {
    "5m".to_string()
}
fn default_retry_base() -> String {
    "1s".to_string()
}
fn default_retry_max() -> String {
    "5m".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            managed_by: default_managed_by(),
            app_name: default_app_name(),
            sandbox_env_var: default_sandbox_env_var(),
            runtime_class_default_sentinel: default_runtime_class_sentinel(),
            replicas: default_replicas(),
            dns: DnsConfig::default(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            namespace: default_dns_namespace(),
            app_label: default_dns_app_label(),
            cluster_domain: default_cluster_domain(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            prune_orphans: default_true(),
            resync_interval: default_resync_interval(),
            retry_base: default_retry_base(),
            retry_max: default_retry_max(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default config file.
    ///
    /// A missing default config file is created from the template; a
    /// missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;

        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths.config_file(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            let config = Config {
                paths,
                source: Some(path),
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.paths = paths;
        config.source = Some(path);
        Ok(config)
    }

    /// Parse and validate TOML content without touching the filesystem.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-pass.
    pub fn validate(&self) -> Result<()> {
        if self.operator.replicas < 0 {
            anyhow::bail!("operator.replicas must not be negative");
        }
        if self.operator.sandbox_env_var.is_empty() {
            anyhow::bail!("operator.sandbox_env_var must not be empty");
        }
        self.resync_interval()?;
        self.retry_bounds()?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.file_path();

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    fn file_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    /// Directory of the file-backed resource store.
    pub fn store_path(&self) -> PathBuf {
        match self.store.path {
            Some(ref p) => PathBuf::from(p),
            None => self.paths.store_dir(),
        }
    }

    pub fn resync_interval(&self) -> Result<Duration> {
        parse_duration(&self.reconcile.resync_interval)
            .map_err(|e| anyhow::anyhow!("Invalid reconcile.resync_interval: {}", e))
    }

    /// `(retry_base, retry_max)`, with base not exceeding max.
    pub fn retry_bounds(&self) -> Result<(Duration, Duration)> {
        let base = parse_duration(&self.reconcile.retry_base)
            .map_err(|e| anyhow::anyhow!("Invalid reconcile.retry_base: {}", e))?;
        let max = parse_duration(&self.reconcile.retry_max)
            .map_err(|e| anyhow::anyhow!("Invalid reconcile.retry_max: {}", e))?;
        if base > max {
            anyhow::bail!("reconcile.retry_base must not exceed reconcile.retry_max");
        }
        Ok((base, max))
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["operator", "managed_by"] => Ok(self.operator.managed_by.clone()),
            ["operator", "app_name"] => Ok(self.operator.app_name.clone()),
            ["operator", "sandbox_env_var"] => Ok(self.operator.sandbox_env_var.clone()),
            ["operator", "runtime_class_default_sentinel"] => {
                Ok(self.operator.runtime_class_default_sentinel.clone())
            }
            ["operator", "replicas"] => Ok(self.operator.replicas.to_string()),
            ["operator", "dns", "namespace"] => Ok(self.operator.dns.namespace.clone()),
            ["operator", "dns", "app_label"] => Ok(self.operator.dns.app_label.clone()),
            ["operator", "dns", "cluster_domain"] => Ok(self.operator.dns.cluster_domain.clone()),
            ["reconcile", "namespace"] => Ok(self.reconcile.namespace.clone()),
            ["reconcile", "prune_orphans"] => Ok(self.reconcile.prune_orphans.to_string()),
            ["reconcile", "resync_interval"] => Ok(self.reconcile.resync_interval.clone()),
            ["reconcile", "retry_base"] => Ok(self.reconcile.retry_base.clone()),
            ["reconcile", "retry_max"] => Ok(self.reconcile.retry_max.clone()),
            ["store", "path"] => Ok(self.store_path().display().to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["operator", "managed_by"] => self.operator.managed_by = value.to_string(),
            ["operator", "app_name"] => self.operator.app_name = value.to_string(),
            ["operator", "sandbox_env_var"] => self.operator.sandbox_env_var = value.to_string(),
            ["operator", "runtime_class_default_sentinel"] => {
                self.operator.runtime_class_default_sentinel = value.to_string()
            }
            ["operator", "replicas"] => self.operator.replicas = value.parse()?,
            ["operator", "dns", "namespace"] => self.operator.dns.namespace = value.to_string(),
            ["operator", "dns", "app_label"] => self.operator.dns.app_label = value.to_string(),
            ["operator", "dns", "cluster_domain"] => {
                self.operator.dns.cluster_domain = value.to_string()
            }
            ["reconcile", "namespace"] => self.reconcile.namespace = value.to_string(),
            ["reconcile", "prune_orphans"] => self.reconcile.prune_orphans = value.parse()?,
            ["reconcile", "resync_interval"] => self.reconcile.resync_interval = value.to_string(),
            ["reconcile", "retry_base"] => self.reconcile.retry_base = value.to_string(),
            ["reconcile", "retry_max"] => self.reconcile.retry_max = value.to_string(),
            ["store", "path"] => self.store.path = Some(value.to_string()),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => self.logging.format = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        self.validate()
    }
}

/// Parse durations like "500ms", "30s", "5m", "1h" or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: u64 = num
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", s))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("unknown duration unit: {}", unit)),
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# sandbox-operator configuration
# Auto-created on first run. Edit as needed.

[operator]
managed_by = "sandbox-operator"
app_name = "inspectsandbox"
# Injected into every container, valued with the sandbox name
sandbox_env_var = "AGENT_ENV"
# runtimeClassName value that means "use the cluster default"
runtime_class_default_sentinel = "CLUSTER_DEFAULT"
replicas = 1

[operator.dns]
namespace = "kube-system"
app_label = "kube-dns"
cluster_domain = "cluster.local"

[reconcile]
namespace = "default"
# Delete workloads, endpoints and policies whose names left the spec
prune_orphans = true
resync_interval = "5m"
retry_base = "1s"
retry_max = "5m"

# [store]
# path = "/var/lib/sandbox-operator/store"   # default: state dir

[logging]
level = "info"
format = "text"                             # text | json
"#;
