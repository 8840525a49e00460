//! `xswitch serve`: REST/SSE API until SIGINT/SIGTERM, then tunnel teardown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use xs_api::{ApiServer, ApiState};
use xs_core::LogHub;

use crate::cli::{build_orchestrator, load_settings, shutdown_signal};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override `api.listen`
    #[arg(long)]
    pub listen: Option<String>,
}

pub async fn run(config: Option<&PathBuf>, args: ServeArgs) -> Result<()> {
    let mut settings = load_settings(config)?;
    if let Some(listen) = args.listen {
        settings.api.listen = listen;
    }

    let orchestrator = Arc::new(build_orchestrator(&settings, LogHub::default())?);
    let supervisor = orchestrator.supervisor().clone();
    let server = ApiServer::new(ApiState::new(orchestrator, &settings));

    tracing::info!(listen = %settings.api.listen, "starting xswitch API");
    let served = server
        .serve(shutdown_signal())
        .await
        .with_context(|| format!("serve API on {}", settings.api.listen));

    supervisor.shutdown().await;
    tracing::info!("xswitch API stopped");
    served
}
