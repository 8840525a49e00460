pub mod auto_connect;
pub mod engine;
pub mod output;
pub mod probe;
pub mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use xs_config::Settings;
use xs_core::{FileCatalog, LogHub, Orchestrator, XrayLauncher};

#[derive(Parser, Debug)]
#[command(name = "xswitch")]
#[command(about = "Probe, rank and switch xray tunnels across subscriptions", long_about = None)]
pub struct Args {
    /// Settings file (JSON or YAML)
    #[arg(short, long, global = true, env = "XS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the REST/SSE API until interrupted
    Serve(serve::ServeArgs),
    /// Url-test every server of one subscription
    Probe(probe::ProbeArgs),
    /// Connect to the fastest server of the first responsive subscription
    AutoConnect(auto_connect::AutoConnectArgs),
    /// Report engine availability and version
    Engine(engine::EngineArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Human,
    Json,
}

/// Load settings from `--config` or, without one, from defaults plus env.
pub fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Settings::from_env(),
    }
}

/// Wire an orchestrator over the configured catalog file and xray binary.
pub fn build_orchestrator(settings: &Settings, hub: LogHub) -> Result<Orchestrator> {
    let catalog_path = settings
        .catalog
        .path
        .clone()
        .context("no catalog configured (set catalog.path or XS_CATALOG)")?;
    let catalog = Arc::new(FileCatalog::new(catalog_path));
    let launcher = Arc::new(XrayLauncher::from_settings(&settings.engine));
    tracing::debug!(binary = %launcher.binary().display(), "engine launcher ready");
    Ok(xs_core::build(settings, catalog, launcher, hub))
}

#[cfg(unix)]
async fn term_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "install signal handler failed: SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn term_signal() {
    std::future::pending::<()>().await;
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        () = term_signal() => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Args::parse_from(["xswitch", "-c", "xs.yaml", "engine", "--format", "json"]);
        assert_eq!(args.config, Some(PathBuf::from("xs.yaml")));
        assert!(matches!(args.command, Commands::Engine(ref a) if a.format == Format::Json));

        let id = uuid::Uuid::new_v4();
        let args = Args::parse_from(["xswitch", "probe", "--subscription", &id.to_string()]);
        match args.command {
            Commands::Probe(a) => {
                assert_eq!(a.subscription, id);
                assert_eq!(a.format, Format::Human);
            }
            other => panic!("unexpected {other:?}"),
        }

        let args = Args::parse_from(["xswitch", "auto-connect", "--subscription", &id.to_string()]);
        assert!(matches!(args.command, Commands::AutoConnect(ref a) if a.subscriptions == vec![id]));
    }

    #[test]
    fn missing_catalog_is_reported() {
        let err = build_orchestrator(&Settings::default(), LogHub::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("no catalog configured"));
    }
}
