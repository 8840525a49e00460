//! `xswitch auto-connect`: connect, then follow the tunnel's log until
//! interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use xs_core::{Attempt, Connected, LogEvent, LogHub, OrchestrateError};

use crate::cli::{build_orchestrator, load_settings, output, shutdown_signal, Format};

#[derive(Args, Debug)]
pub struct AutoConnectArgs {
    /// Try only these subscriptions, in this order (repeatable)
    #[arg(long = "subscription")]
    pub subscriptions: Vec<Uuid>,

    #[arg(long, value_enum, default_value = "human")]
    pub format: Format,
}

#[derive(Serialize)]
struct ConnectedReport<'a> {
    subscription_id: Uuid,
    subscription_name: &'a str,
    server_id: Uuid,
    remarks: &'a str,
    ping_ms: Option<u64>,
    socks_port: Option<u16>,
    http_port: Option<u16>,
    attempts: &'a [Attempt],
}

pub async fn run(config: Option<&PathBuf>, args: AutoConnectArgs) -> Result<()> {
    let settings = load_settings(config)?;
    let hub = LogHub::default();
    let orchestrator = build_orchestrator(&settings, hub.clone())?;
    let order = (!args.subscriptions.is_empty()).then_some(args.subscriptions);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let outcome = orchestrator.auto_connect(order, &cancel).await;
    let connected = match outcome {
        Ok(connected) => connected,
        Err(OrchestrateError::Cancelled { .. }) => {
            signals.abort();
            orchestrator.supervisor().shutdown().await;
            return Ok(());
        }
        Err(err) => {
            signals.abort();
            for attempt in err.attempts() {
                tracing::warn!(
                    subscription = %attempt.subscription_name,
                    reason = %attempt.reason,
                    "subscription skipped"
                );
            }
            return Err(err.into());
        }
    };
    report(args.format, &connected);

    // Follow the tunnel until interrupted.
    let mut rx = hub.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => print_event(args.format, &event),
                Err(RecvError::Lagged(n)) => print_event(args.format, &LogEvent::skipped(n)),
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.supervisor().shutdown().await;
    Ok(())
}

fn report(format: Format, connected: &Connected) {
    let ports = &connected.tunnel.allocated_ports;
    let port_of = |protocol: &str| ports.iter().find(|p| p.protocol == protocol).map(|p| p.port);
    let view = ConnectedReport {
        subscription_id: connected.subscription.id,
        subscription_name: &connected.subscription.name,
        server_id: connected.tunnel.server_id,
        remarks: &connected.tunnel.remarks,
        ping_ms: connected.result.latency_ms(),
        socks_port: port_of("socks"),
        http_port: port_of("http"),
        attempts: &connected.attempts,
    };
    output::emit(
        format,
        || {
            let mut out = format!(
                "connected: {} ({}) {} ms",
                view.remarks,
                view.subscription_name,
                view.ping_ms.unwrap_or_default()
            );
            if let (Some(socks), Some(http)) = (view.socks_port, view.http_port) {
                out.push_str(&format!("\nSOCKS 127.0.0.1:{socks}  HTTP 127.0.0.1:{http}"));
            }
            for attempt in view.attempts {
                out.push_str(&format!("\nskipped {}: {}", attempt.subscription_name, attempt.reason));
            }
            out
        },
        &view,
    );
}

fn print_event(format: Format, event: &LogEvent) {
    match format {
        Format::Human => println!("[{}] {}", event.kind.as_str(), event.message),
        Format::Json => {
            let line = serde_json::json!({
                "type": event.kind.as_str(),
                "timestamp": event.timestamp,
                "message": event.message,
            });
            println!("{line}");
        }
    }
}
