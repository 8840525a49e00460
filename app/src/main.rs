//! xswitch: probe subscriptions, rank servers and keep one xray tunnel up.

mod cli;
mod logging;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    logging::init_logging()?;

    let config = args.config.as_ref();
    let result = match args.command {
        cli::Commands::Serve(a) => cli::serve::run(config, a).await,
        cli::Commands::Probe(a) => cli::probe::run(config, a).await,
        cli::Commands::AutoConnect(a) => cli::auto_connect::run(config, a).await,
        cli::Commands::Engine(a) => cli::engine::run(config, a).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "command failed");
    }
    logging::flush_logs().await;
    result
}
