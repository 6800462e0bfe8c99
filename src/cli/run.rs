use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{Controller, ObjectKey};
use crate::reconcile::Reconciler;

#[derive(Args)]
pub struct RunArgs {
    /// Concurrent reconcile passes (distinct sandboxes only)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Reconcile only these sandboxes at startup; resync still lists all
    #[arg(long = "sandbox", value_name = "NAME")]
    pub sandboxes: Vec<String>,
}

pub async fn run(args: RunArgs, config: &Config) -> Result<()> {
    let store = super::open_store(config)?;
    info!(store = %store.root().display(), "using file store");

    let mut controller = Controller::new(Reconciler::new(store, config), config)?;
    if let Some(workers) = args.workers {
        controller = controller.with_workers(workers);
    }

    let handle = controller.handle();
    for name in args.sandboxes {
        handle.enqueue(ObjectKey::new(&config.reconcile.namespace, name));
    }

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("received ctrl-c");
        })
        .await
}
