//! Entry point: parses CLI arguments into an [`AgentConfig`], resolves the
//! CDP port, initializes logging, and runs the orchestrator to completion.

mod cdp;
mod concurrency;
mod config;
mod css;
mod error;
mod orchestrator;
mod registry;
mod resolve;

use std::process::exit;

use clap::Parser;
use log::error;

use config::{AgentConfig, Cli};
use error::FatalError;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_logging(verbose);

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let chrome_host = cli.chrome_host.clone();
    let requested_port = cli.chrome_port.unwrap_or(0);
    let mut config = AgentConfig::from_cli(cli)?;
    config.chrome_port = config::resolve_chrome_port(&chrome_host, requested_port).await?;

    Orchestrator::run(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_distinguishable_from_recoverable_ones() {
        let fatal: anyhow::Error = FatalError::ProjectRootMissing { path: "/nope".into() }.into();
        assert!(fatal.downcast_ref::<FatalError>().is_some());
    }
}
