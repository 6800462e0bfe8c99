use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::reconcile::status::READY_CONDITION;
use crate::spec::Sandbox;
use crate::store::{self, FileStore};

#[derive(Args)]
pub struct StatusArgs {
    /// Sandbox name
    pub name: String,

    /// Namespace (default: reconcile.namespace from config)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Output format: text (default), yaml or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let namespace = args
        .namespace
        .unwrap_or_else(|| config.reconcile.namespace.clone());
    let store = super::open_store(config)?;

    let Some(sandbox) =
        store::get_typed::<Sandbox, FileStore>(store.as_ref(), &namespace, &args.name).await?
    else {
        anyhow::bail!("sandbox {}/{} not found", namespace, args.name);
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&sandbox.status)?),
        "yaml" => print!("{}", serde_yaml::to_string(&sandbox.status)?),
        _ => print_status(&sandbox),
    }
    Ok(())
}

fn print_status(sandbox: &Sandbox) {
    println!("Sandbox: {}/{}", sandbox.namespace(), sandbox.name());

    match sandbox.status.condition(READY_CONDITION) {
        Some(ready) => {
            println!("Ready:   {:?} ({})", ready.status, ready.reason);
            if !ready.message.is_empty() {
                println!("         {}", ready.message);
            }
            println!("Since:   {}", ready.last_transition_time.to_rfc3339());
        }
        None => println!("Ready:   (never reconciled)"),
    }

    if sandbox.status.services.is_empty() {
        return;
    }
    println!("Services:");
    for (name, status) in &sandbox.status.services {
        let mark = if status.ready { "✓" } else { "✗" };
        println!("  {} {:<20} {}", mark, name, status.message);
    }
}
