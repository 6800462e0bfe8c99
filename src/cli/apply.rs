use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::reconcile::{PassOutcome, PassReport, Reconciler};
use crate::resources::{Kind, Resource};
use crate::store::ResourceStore;

#[derive(Args)]
pub struct ApplyArgs {
    /// Sandbox manifest (YAML)
    pub manifest: PathBuf,

    /// Store the manifest without reconciling it
    #[arg(long)]
    pub no_reconcile: bool,
}

pub async fn run(args: ApplyArgs, config: &Config) -> Result<()> {
    let sandbox = super::load_manifest(&args.manifest, &config.reconcile.namespace)?;
    let namespace = sandbox.namespace().to_string();
    let name = sandbox.name().to_string();

    let store = super::open_store(config)?;
    match store.get(Kind::Sandbox, &namespace, &name).await {
        Ok(_) => {
            store.update(sandbox.into_object()).await?;
            println!("sandbox {}/{} configured", namespace, name);
        }
        Err(e) if e.is_not_found() => {
            store.create(sandbox.into_object()).await?;
            println!("sandbox {}/{} created", namespace, name);
        }
        Err(e) => return Err(e.into()),
    }

    if args.no_reconcile {
        return Ok(());
    }

    let reconciler = Reconciler::new(store, config);
    match reconciler.reconcile(&namespace, &name).await? {
        PassOutcome::Missing => println!("sandbox {}/{} disappeared", namespace, name),
        PassOutcome::Converged(report) => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &PassReport) {
    println!(
        "Objects: {} created, {} updated, {} unchanged",
        report.changes.created, report.changes.updated, report.changes.unchanged
    );
    for pruned in &report.pruned {
        println!("Pruned:  {}", pruned);
    }
    println!(
        "Services ({}/{} ready):",
        report.ready_count(),
        report.services.len()
    );
    for (name, status) in &report.services {
        println!("  {:<20} {}", name, status.message);
    }
}
