//! Tunnel lifecycle: start, stop, crash detection.
//!
//! `start`/`stop` are serialized by an async mutex that owns the live engine
//! handle. The published [`TunnelStatus`] sits behind a separate sync lock and
//! is replaced whole on every transition, so `status()` never waits on a
//! transition in progress and never sees half of one.
//!
//! Transitions may be abandoned at any await point. A stop publishes
//! `Stopped` before it first yields, and the old engine's watcher keeps its
//! ports until the process is gone. An interrupted stop leaves the watcher in
//! the slot's `draining` handle, and the next transition waits for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use xs_config::defaults::{DEFAULT_HTTP_PORT, DEFAULT_SOCKS_PORT};
use xs_config::{EngineLogLevel, TunnelSettings};

use super::{FailureKind, RunningTunnel, TunnelFailure, TunnelStatus};
use crate::catalog::Server;
use crate::engine::{self, config, EngineLauncher, EngineProcess, InboundPorts, LaunchSpec};
use crate::error::SupervisorError;
use crate::logs::{LogEvent, LogHub};
use crate::ports::{PortAllocator, PortError, PortLease};

/// Result of [`TunnelSupervisor::ensure_running`].
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(RunningTunnel),
    AlreadyRunning(RunningTunnel),
}

impl StartOutcome {
    pub fn tunnel(&self) -> &RunningTunnel {
        match self {
            StartOutcome::Started(t) | StartOutcome::AlreadyRunning(t) => t,
        }
    }
}

struct ActiveTunnel {
    remarks: String,
    stop_tx: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

/// A stopped tunnel whose engine may still be shutting down.
struct Draining {
    remarks: String,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    tunnel: Option<ActiveTunnel>,
    draining: Option<Draining>,
}

struct Inner {
    launcher: Arc<dyn EngineLauncher>,
    ports: PortAllocator,
    settings: TunnelSettings,
    log_level: EngineLogLevel,
    hub: LogHub,
    status: RwLock<TunnelStatus>,
    slot: Mutex<Slot>,
    /// Bumped on every start and stop; a watcher only reports a crash for the
    /// generation it was spawned for.
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct TunnelSupervisor {
    inner: Arc<Inner>,
}

impl TunnelSupervisor {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        ports: PortAllocator,
        settings: TunnelSettings,
        log_level: EngineLogLevel,
        hub: LogHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                ports,
                settings,
                log_level,
                hub,
                status: RwLock::new(TunnelStatus::Stopped),
                slot: Mutex::new(Slot::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current state. Never waits on a transition.
    pub fn status(&self) -> TunnelStatus {
        self.inner.status.read().clone()
    }

    pub fn log_hub(&self) -> &LogHub {
        &self.inner.hub
    }

    /// Start `server`, stopping whatever runs first.
    pub async fn start(&self, server: &Server) -> Result<RunningTunnel, SupervisorError> {
        let mut slot = self.inner.slot.lock().await;
        self.start_locked(&mut slot, server).await
    }

    /// Like [`start`](Self::start), but leaves the tunnel alone when `server`
    /// is already the running one.
    pub async fn ensure_running(&self, server: &Server) -> Result<StartOutcome, SupervisorError> {
        let mut slot = self.inner.slot.lock().await;
        if let TunnelStatus::Running(running) = self.status() {
            if running.server_id == server.id && slot.tunnel.is_some() {
                return Ok(StartOutcome::AlreadyRunning(running));
            }
        }
        self.start_locked(&mut slot, server)
            .await
            .map(StartOutcome::Started)
    }

    /// Stop the tunnel. Idempotent; returns the state it replaced.
    pub async fn stop(&self) -> TunnelStatus {
        let mut slot = self.inner.slot.lock().await;
        let previous = self.status();
        self.begin_stop(&mut slot);
        *self.inner.status.write() = TunnelStatus::Stopped;
        self.drain(&mut slot).await;
        previous
    }

    /// Stop on service exit.
    pub async fn shutdown(&self) {
        let previous = self.stop().await;
        if previous.is_running() {
            tracing::info!("tunnel stopped on shutdown");
        }
    }

    fn resolve_ports(&self, server: &Server) -> Result<InboundPorts, SupervisorError> {
        let (declared_socks, declared_http) = config::declared_ports(&server.config);
        let socks = self
            .inner
            .settings
            .socks_port
            .or(declared_socks)
            .unwrap_or(DEFAULT_SOCKS_PORT);
        let http = self
            .inner
            .settings
            .http_port
            .or(declared_http)
            .unwrap_or(DEFAULT_HTTP_PORT);
        if socks == http {
            return Err(SupervisorError::PortUnavailable {
                port: socks,
                reason: "SOCKS and HTTP ports cannot be the same".into(),
            });
        }
        Ok(InboundPorts { socks, http })
    }

    fn reserve(&self, port: u16) -> Result<PortLease, SupervisorError> {
        self.inner.ports.reserve(port).map_err(|e| match e {
            PortError::Unavailable { port, reason } => SupervisorError::PortUnavailable { port, reason },
            PortError::Exhausted { start, .. } => SupervisorError::PortUnavailable {
                port: start,
                reason: e.to_string(),
            },
        })
    }

    async fn start_locked(
        &self,
        slot: &mut Slot,
        server: &Server,
    ) -> Result<RunningTunnel, SupervisorError> {
        if let Some(previous) = &slot.tunnel {
            tracing::info!(previous = %previous.remarks, next = %server.remarks, "replacing running tunnel");
        }
        self.begin_stop(slot);
        self.drain(slot).await;

        let ports = self.resolve_ports(server)?;
        let socks_lease = self.reserve(ports.socks)?;
        let http_lease = self.reserve(ports.http)?;

        match self.launch(server, ports).await {
            Ok((running, process)) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *self.inner.status.write() = TunnelStatus::Running(running.clone());

                let (stop_tx, stop_rx) = oneshot::channel();
                let watcher = tokio::spawn(watch(
                    Arc::clone(&self.inner),
                    generation,
                    running.clone(),
                    process,
                    stop_rx,
                    [socks_lease, http_lease],
                ));
                slot.tunnel = Some(ActiveTunnel {
                    remarks: running.remarks.clone(),
                    stop_tx,
                    watcher,
                });

                tracing::info!(
                    server = %running.server_id,
                    remarks = %running.remarks,
                    pid = ?running.pid,
                    socks = ports.socks,
                    http = ports.http,
                    "tunnel running"
                );
                self.inner.hub.publish(LogEvent::info(format!(
                    "Server {} started on SOCKS {} / HTTP {}",
                    running.remarks, ports.socks, ports.http
                )));
                Ok(running)
            }
            Err(err) => {
                let (kind, reason) = match &err {
                    SupervisorError::EngineCrashed(reason) => (FailureKind::Crashed, reason.clone()),
                    SupervisorError::EngineLaunchFailed(reason) => (FailureKind::LaunchFailed, reason.clone()),
                    other => (FailureKind::LaunchFailed, other.to_string()),
                };
                tracing::error!(server = %server.id, remarks = %server.remarks, %reason, "tunnel launch failed");
                self.inner.hub.publish(LogEvent::error(format!(
                    "Failed to start server {}: {reason}",
                    server.remarks
                )));
                *self.inner.status.write() = TunnelStatus::Error(TunnelFailure {
                    server_id: server.id,
                    subscription_id: server.subscription_id,
                    remarks: server.remarks.clone(),
                    kind,
                    reason,
                    at: Utc::now(),
                });
                Err(err)
            }
        }
    }

    /// Spawn the engine and wait for readiness. On failure the process is
    /// gone by the time this returns.
    async fn launch(
        &self,
        server: &Server,
        ports: InboundPorts,
    ) -> Result<(RunningTunnel, Box<dyn EngineProcess>), SupervisorError> {
        let rendered = config::render(&server.config, ports, self.inner.log_level)?;
        let allocated_ports = config::allocated_ports(&rendered);

        let mut process = self
            .inner
            .launcher
            .launch(LaunchSpec {
                label: server.remarks.clone(),
                config: rendered,
                log_hub: Some(self.inner.hub.clone()),
            })
            .await?;

        if let Err(e) = engine::wait_ready(
            &mut *process,
            &[ports.socks, ports.http],
            self.inner.settings.ready_timeout(),
        )
        .await
        {
            process.shutdown(Duration::ZERO).await;
            return Err(SupervisorError::EngineLaunchFailed(e.to_string()));
        }
        // Ports opened, but the engine may have died straight after.
        if let Some(report) = process.try_wait() {
            process.shutdown(Duration::ZERO).await;
            return Err(SupervisorError::EngineCrashed(report.to_string()));
        }

        let running = RunningTunnel {
            server_id: server.id,
            subscription_id: server.subscription_id,
            remarks: server.remarks.clone(),
            pid: process.pid(),
            started_at: Utc::now(),
            allocated_ports,
        };
        Ok((running, process))
    }

    /// Detach the running tunnel and publish `Stopped`. Does not yield, so an
    /// abandoned caller can never leave a stale `Running` behind.
    fn begin_stop(&self, slot: &mut Slot) {
        let Some(tunnel) = slot.tunnel.take() else {
            return;
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.status.write() = TunnelStatus::Stopped;
        let _ = tunnel.stop_tx.send(());
        slot.draining = Some(Draining {
            remarks: tunnel.remarks,
            watcher: tunnel.watcher,
        });
    }

    /// Wait for a detached engine to exit. Resumes a wait that an earlier,
    /// abandoned transition left behind.
    async fn drain(&self, slot: &mut Slot) {
        let Some(draining) = slot.draining.as_mut() else {
            return;
        };
        let joined = (&mut draining.watcher).await;
        let remarks = std::mem::take(&mut draining.remarks);
        slot.draining = None;

        if let Err(e) = joined {
            tracing::warn!(remarks = %remarks, error = %e, "tunnel watcher ended abnormally");
        }
        tracing::info!(remarks = %remarks, "tunnel stopped");
        self.inner
            .hub
            .publish(LogEvent::info(format!("Server {remarks} stopped")));
    }
}

/// Owns the engine process and its ports while it runs. Either the process
/// exits on its own (crash) or a stop request arrives and the process is shut
/// down. The ports are released only once the process is gone.
async fn watch(
    inner: Arc<Inner>,
    generation: u64,
    running: RunningTunnel,
    mut process: Box<dyn EngineProcess>,
    mut stop_rx: oneshot::Receiver<()>,
    _leases: [PortLease; 2],
) {
    tokio::select! {
        report = process.wait() => {
            let reason = report.to_string();
            let crashed = {
                let mut status = inner.status.write();
                let current = inner.generation.load(Ordering::SeqCst) == generation;
                if current && status.is_running() {
                    *status = TunnelStatus::Error(TunnelFailure {
                        server_id: running.server_id,
                        subscription_id: running.subscription_id,
                        remarks: running.remarks.clone(),
                        kind: FailureKind::Crashed,
                        reason: reason.clone(),
                        at: Utc::now(),
                    });
                }
                current
            };
            if crashed {
                tracing::error!(remarks = %running.remarks, %reason, "engine exited unexpectedly");
                inner.hub.publish(LogEvent::error(format!(
                    "Server {} crashed: {reason}",
                    running.remarks
                )));
            }
        }
        _ = &mut stop_rx => {
            process.shutdown(inner.settings.stop_grace()).await;
        }
    }
}
