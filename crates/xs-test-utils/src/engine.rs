//! In-process fake of the xray engine.
//!
//! Behaviour is scripted per server through a `"mock"` object in the server's
//! own configuration, which survives config rendering untouched:
//!
//! ```json
//! { "mock": { "delay_ms": 80 } }          // answers 204 after 80 ms
//! { "mock": { "status": 502 } }           // answers 502
//! { "mock": { "hang": true } }            // accepts, never answers
//! { "mock": { "exit_code": 23 } }         // exits before opening ports
//! { "mock": { "launch_error": "boom" } }  // launch itself fails
//! { "mock": { "crash_after_ms": 100 } }   // runs, then dies with code 1
//! { "mock": { "drop_requests": true } }   // closes proxied requests unanswered
//! { "mock": { "exit_when_ready": true } } // dies right after its ports open
//! { "mock": { "stop_delay_ms": 500 } }    // takes 500 ms to shut down
//! ```
//!
//! A server without `"mock"` answers 204 immediately.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use xs_core::engine::config::allocated_ports;
use xs_core::engine::{EngineLauncher, EngineProcess, ExitReport, LaunchSpec};
use xs_core::{LaunchError, LogEvent};

use crate::http::{self, Responder};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Script {
    delay_ms: u64,
    status: Option<u16>,
    hang: bool,
    exit_code: Option<i32>,
    launch_error: Option<String>,
    crash_after_ms: Option<u64>,
    drop_requests: bool,
    exit_when_ready: bool,
    stop_delay_ms: u64,
}

impl Script {
    fn from_config(config: &Value) -> Self {
        config
            .get("mock")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Lifecycle events observed by a [`MockLauncher`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Launched { label: String, pid: u32 },
    Stopped { label: String, pid: u32 },
    Dropped { label: String, pid: u32 },
    Exited { label: String, pid: u32, code: i32 },
}

#[derive(Debug, Default)]
struct Shared {
    events: Mutex<Vec<MockEvent>>,
    live: AtomicUsize,
    next_pid: AtomicU32,
}

impl Shared {
    fn record(&self, event: MockEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    shared: Arc<Shared>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().clone()
    }

    /// Labels of every launch, in order.
    pub fn launched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Launched { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    /// Processes launched and not yet shut down or dropped.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

async fn bind(port: u16) -> Result<TcpListener, LaunchError> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|e| LaunchError::Other(format!("mock bind {port}: {e}")))
}

#[async_trait]
impl EngineLauncher for MockLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn EngineProcess>, LaunchError> {
        let script = Script::from_config(&spec.config);
        if let Some(message) = script.launch_error {
            return Err(LaunchError::Other(message));
        }

        let pid = 10_000 + self.shared.next_pid.fetch_add(1, Ordering::SeqCst);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.shared.record(MockEvent::Launched {
            label: spec.label.clone(),
            pid,
        });
        let (exit_tx, exit_rx) = watch::channel(None);
        let mut process = MockProcess {
            label: spec.label.clone(),
            pid,
            task: None,
            exit_tx: Arc::new(exit_tx),
            exit_rx,
            shared: Arc::clone(&self.shared),
            finished: false,
            exit_when_ready: script.exit_when_ready,
            exit_checks: 0,
            stop_delay: Duration::from_millis(script.stop_delay_ms),
        };

        if let Some(code) = script.exit_code {
            process.exit(code, "Failed to start: mock engine refused config");
            return Ok(Box::new(process));
        }

        let ports = allocated_ports(&spec.config);
        let mut listeners = Vec::new();
        for p in &ports {
            // On failure `process` is dropped and un-counted.
            listeners.push((p.protocol.clone(), bind(p.port).await?));
        }

        let responder = Responder {
            status: script.status.unwrap_or(204),
            delay: Duration::from_millis(script.delay_ms),
            hang: script.hang,
            drop_requests: script.drop_requests,
        };
        if let Some(hub) = &spec.log_hub {
            hub.publish(LogEvent::log(format!("mock engine {} listening", spec.label)));
        }

        let exit_tx = Arc::clone(&process.exit_tx);
        let shared = Arc::clone(&self.shared);
        let label = spec.label.clone();
        let hub = spec.log_hub.clone();
        let crash_after = script.crash_after_ms.map(Duration::from_millis);
        process.task = Some(tokio::spawn(async move {
            // Listeners live inside this task's future, so aborting and
            // awaiting the task closes them.
            let servers = join_all(listeners.into_iter().map(|(protocol, listener)| async move {
                if protocol == "http" {
                    http::serve(listener, responder).await;
                } else {
                    accept_and_drop(listener).await;
                }
            }));
            let crash = async {
                match crash_after {
                    Some(after) => tokio::time::sleep(after).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = servers => {}
                _ = crash => {}
            }
            if let Some(hub) = hub {
                hub.publish(LogEvent::log("panic: mock engine crashed"));
            }
            shared.record(MockEvent::Exited {
                label,
                pid,
                code: 1,
            });
            exit_tx.send_replace(Some(ExitReport {
                code: Some(1),
                output: vec!["panic: mock engine crashed".into()],
            }));
        }));
        Ok(Box::new(process))
    }
}

async fn accept_and_drop(listener: TcpListener) {
    while listener.accept().await.is_ok() {}
}

struct MockProcess {
    label: String,
    pid: u32,
    task: Option<JoinHandle<()>>,
    exit_tx: Arc<watch::Sender<Option<ExitReport>>>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
    shared: Arc<Shared>,
    finished: bool,
    exit_when_ready: bool,
    exit_checks: u32,
    stop_delay: Duration,
}

impl MockProcess {
    fn exit(&mut self, code: i32, line: &str) {
        self.shared.record(MockEvent::Exited {
            label: self.label.clone(),
            pid: self.pid,
            code,
        });
        self.exit_tx.send_replace(Some(ExitReport {
            code: Some(code),
            output: vec![line.to_owned()],
        }));
    }

    fn teardown(&mut self) -> bool {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.finished {
            return false;
        }
        self.finished = true;
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl EngineProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> ExitReport {
        loop {
            let current = self.exit_rx.borrow().clone();
            if let Some(report) = current {
                return report;
            }
            if self.exit_rx.changed().await.is_err() {
                return ExitReport::default();
            }
        }
    }

    fn try_wait(&mut self) -> Option<ExitReport> {
        // The first check sees a live process; it is dead by the next one.
        if self.exit_when_ready && self.exit_rx.borrow().is_none() {
            self.exit_checks += 1;
            if self.exit_checks > 1 {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.exit(1, "panic: mock engine crashed");
            }
        }
        self.exit_rx.borrow().clone()
    }

    async fn shutdown(&mut self, _grace: Duration) {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        if self.teardown() {
            self.shared.record(MockEvent::Stopped {
                label: self.label.clone(),
                pid: self.pid,
            });
        }
        let exited = self.exit_rx.borrow().is_some();
        if !exited {
            self.exit_tx.send_replace(Some(ExitReport::default()));
        }
    }
}

impl Drop for MockProcess {
    fn drop(&mut self) {
        if self.teardown() {
            self.shared.record(MockEvent::Dropped {
                label: self.label.clone(),
                pid: self.pid,
            });
        }
    }
}
