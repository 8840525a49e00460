//! Concurrent latency probing through transient engine instances.
//!
//! Every probe owns its scratch ports and its engine process as RAII values,
//! so a probe that times out or is dropped mid-flight (auto-connect
//! cancellation) still releases both.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use uuid::Uuid;
use xs_config::{EngineLogLevel, ProbeSettings};

use crate::catalog::Server;
use crate::engine::{self, config, EngineLauncher, InboundPorts, LaunchSpec, NotReady};
use crate::error::ProbeFailure;
use crate::ports::PortAllocator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Always `>= 1`.
    Reachable { latency_ms: u64 },
    Failed { reason: ProbeFailure },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub server_id: Uuid,
    pub remarks: String,
    pub outcome: ProbeOutcome,
    pub socks_port: Option<u16>,
    pub http_port: Option<u16>,
}

impl ProbeResult {
    pub fn reachable(server: &Server, latency_ms: u64, ports: Option<InboundPorts>) -> Self {
        Self::new(
            server,
            ProbeOutcome::Reachable {
                latency_ms: latency_ms.max(1),
            },
            ports,
        )
    }

    pub fn failed(server: &Server, reason: ProbeFailure, ports: Option<InboundPorts>) -> Self {
        Self::new(server, ProbeOutcome::Failed { reason }, ports)
    }

    fn new(server: &Server, outcome: ProbeOutcome, ports: Option<InboundPorts>) -> Self {
        Self {
            server_id: server.id,
            remarks: server.remarks.clone(),
            outcome,
            socks_port: ports.map(|p| p.socks),
            http_port: ports.map(|p| p.http),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Reachable { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self.outcome {
            ProbeOutcome::Reachable { latency_ms } => Some(latency_ms),
            ProbeOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            ProbeOutcome::Reachable { .. } => None,
            ProbeOutcome::Failed { reason } => Some(reason.to_string()),
        }
    }
}

#[derive(Serialize)]
struct WireProbeResult<'a> {
    server_id: Uuid,
    remarks: &'a str,
    success: bool,
    ping_ms: Option<u64>,
    error: Option<String>,
    socks_port: Option<u16>,
    http_port: Option<u16>,
}

impl Serialize for ProbeResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireProbeResult {
            server_id: self.server_id,
            remarks: &self.remarks,
            success: self.success(),
            ping_ms: self.latency_ms(),
            error: self.error(),
            socks_port: self.socks_port,
            http_port: self.http_port,
        }
        .serialize(serializer)
    }
}

pub struct ProbeEngine {
    launcher: Arc<dyn EngineLauncher>,
    ports: PortAllocator,
    settings: ProbeSettings,
    log_level: EngineLogLevel,
}

impl ProbeEngine {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        ports: PortAllocator,
        settings: ProbeSettings,
        log_level: EngineLogLevel,
    ) -> Self {
        Self {
            launcher,
            ports,
            settings,
            log_level,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout()
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Probe with the configured per-probe timeout.
    pub async fn probe(&self, servers: &[Server]) -> Vec<ProbeResult> {
        self.probe_with_timeout(servers, self.timeout()).await
    }

    /// One result per server, in input order. At most `max_concurrency`
    /// probes are in flight.
    pub async fn probe_with_timeout(&self, servers: &[Server], timeout: Duration) -> Vec<ProbeResult> {
        let started = Instant::now();
        let probes: Vec<_> = servers
            .iter()
            .map(|server| self.probe_one(server, timeout))
            .collect();
        let results: Vec<ProbeResult> = stream::iter(probes)
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        let ok = results.iter().filter(|r| r.success()).count();
        tracing::info!(
            servers = servers.len(),
            ok,
            failed = servers.len() - ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "probe batch finished"
        );
        results
    }

    async fn probe_one(&self, server: &Server, timeout: Duration) -> ProbeResult {
        let (socks, http) = match self.ports.lease_pair() {
            Ok(pair) => pair,
            Err(e) => {
                return ProbeResult::failed(server, ProbeFailure::EngineStart(e.to_string()), None)
            }
        };
        let ports = InboundPorts {
            socks: socks.port(),
            http: http.port(),
        };

        let result = match tokio::time::timeout(timeout, self.attempt(server, ports, timeout)).await {
            Ok(Ok(latency_ms)) => ProbeResult::reachable(server, latency_ms, Some(ports)),
            Ok(Err(reason)) => ProbeResult::failed(server, reason, Some(ports)),
            Err(_) => ProbeResult::failed(server, ProbeFailure::Timeout, Some(ports)),
        };
        tracing::debug!(
            server = %server.id,
            remarks = %server.remarks,
            ping_ms = ?result.latency_ms(),
            error = ?result.error(),
            "probe finished"
        );
        drop((socks, http));
        result
    }

    async fn attempt(
        &self,
        server: &Server,
        ports: InboundPorts,
        timeout: Duration,
    ) -> Result<u64, ProbeFailure> {
        let rendered = config::render(&server.config, ports, self.log_level)
            .map_err(|e| ProbeFailure::EngineStart(e.to_string()))?;
        let mut process = self
            .launcher
            .launch(LaunchSpec {
                label: format!("probe:{}", server.remarks),
                config: rendered,
                log_hub: None,
            })
            .await
            .map_err(|e| ProbeFailure::EngineStart(e.to_string()))?;

        let outcome = async {
            engine::wait_ready(&mut *process, &[ports.http], timeout)
                .await
                .map_err(|e| match e {
                    NotReady::Exited(report) => ProbeFailure::EngineStart(report.to_string()),
                    NotReady::TimedOut => ProbeFailure::Timeout,
                })?;
            self.measure(ports.http).await
        }
        .await;

        process.shutdown(Duration::ZERO).await;
        outcome
    }

    async fn measure(&self, http_port: u16) -> Result<u64, ProbeFailure> {
        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{http_port}"))
            .map_err(|e| ProbeFailure::TestRequestFailed(e.to_string()))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeFailure::TestRequestFailed(e.to_string()))?;

        let started = Instant::now();
        let response = client
            .get(&self.settings.test_url)
            .send()
            .await
            .map_err(classify)?;
        let elapsed = started.elapsed();

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::HttpStatus(status.as_u16()));
        }
        Ok((elapsed.as_millis() as u64).max(1))
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn classify(err: reqwest::Error) -> ProbeFailure {
    classify_failure(error_chain(&err), err.is_connect(), err.is_timeout())
}

/// Map a failed test request to a probe failure from its rendered error
/// chain and the client's own connect/timeout flags.
fn classify_failure(text: String, is_connect: bool, is_timeout: bool) -> ProbeFailure {
    if is_timeout {
        return ProbeFailure::Timeout;
    }
    let lower = text.to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));
    if mentions(&["tls", "handshake", "certificate", "ssl"]) {
        ProbeFailure::HandshakeFailure(text)
    } else if is_connect || mentions(&["refused", "reset", "closed", "unreachable"]) {
        ProbeFailure::Unreachable(text)
    } else {
        ProbeFailure::TestRequestFailed(text)
    }
}
