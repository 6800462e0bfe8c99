//! CLI subcommand: `sandbox-operator paths`
//!
//! Shows where the config file and store live, and how the store lays
//! out documents for the watched namespace.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::resources::Kind;
use crate::store::FileStore;

pub fn run(config: &Config) -> Result<()> {
    let config_file = config
        .source
        .clone()
        .unwrap_or_else(|| config.paths.config_file());
    let store = config.store_path();

    println!("config file:  {}", config_file.display());
    println!("state dir:    {}", config.paths.state_dir.display());
    println!("store:        {}", store.display());
    if config.store.path.is_some() {
        println!("              (store.path overrides {})", config.paths.store_dir().display());
    }
    println!();
    for line in store_layout(&store, &config.reconcile.namespace)? {
        println!("{line}");
    }
    Ok(())
}

/// One line per kind: its directory in `namespace` and how many
/// documents it holds.
fn store_layout(root: &Path, namespace: &str) -> Result<Vec<String>> {
    let store = FileStore::new(root);
    Kind::ALL
        .iter()
        .map(|&kind| -> Result<String> {
            let dir = store.kind_dir(kind, namespace)?;
            let documents = std::fs::read_dir(&dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                        .count()
                })
                .unwrap_or(0);
            Ok(format!(
                "{:<16} {}/<name>.json ({documents})",
                kind.plural(),
                dir.display()
            ))
        })
        .collect()
}
