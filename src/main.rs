use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sandbox_operator::cli::{self, Cli, Commands};
use sandbox_operator::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let Cli {
        command,
        verbose,
        config: config_path,
    } = cli;
    let config_path = config_path.as_deref();

    // Config management must work even when the config file does not parse.
    let command = match command {
        Commands::Config(args) => {
            init_logging(verbose, &LoggingConfig::default());
            return cli::config::run(args, config_path).await;
        }
        other => other,
    };

    let config = Config::load(config_path)?;
    init_logging(verbose, &config.logging);

    match command {
        Commands::Apply(args) => cli::apply::run(args, &config).await,
        Commands::Render(args) => cli::render::run(args, &config).await,
        Commands::Status(args) => cli::status::run(args, &config).await,
        Commands::Run(args) => cli::run::run(args, &config).await,
        Commands::Config(args) => cli::config::run(args, config_path).await,
        Commands::Paths => cli::paths::run(&config),
    }
}

/// RUST_LOG wins; otherwise `--verbose`, otherwise the configured level.
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
