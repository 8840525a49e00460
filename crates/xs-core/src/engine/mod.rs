//! External proxy engine processes.
//!
//! [`EngineLauncher`] is the seam between orchestration and the real xray
//! binary: the tunnel supervisor and the probe engine only ever see
//! [`EngineProcess`] handles, so tests substitute an in-process fake.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::LaunchError;
use crate::logs::{LogEvent, LogHub};

pub mod config;
pub mod version;

pub use config::{AllocatedPort, InboundPorts};
pub use version::{parse_version, probe_version, EngineInfo};

/// Lines of output kept for failure reports.
const OUTPUT_TAIL: usize = 20;

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Human label used in logs, e.g. the server remarks.
    pub label: String,
    /// Fully rendered engine configuration.
    pub config: Value,
    /// Forward output lines here; `None` for transient probe engines.
    pub log_hub: Option<LogHub>,
}

/// How an engine process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    /// Last lines of combined stdout/stderr.
    pub output: Vec<String>,
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exited with code {code}")?,
            None => write!(f, "terminated by signal")?,
        }
        if let Some(last) = self.output.last() {
            write!(f, ": {last}")?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait EngineProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit. Cancel safe.
    async fn wait(&mut self) -> ExitReport;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Option<ExitReport>;

    /// Graceful signal, then kill once `grace` elapses. Returns once the
    /// process is gone; a no-op if it already exited.
    async fn shutdown(&mut self, grace: Duration);
}

#[async_trait]
pub trait EngineLauncher: Send + Sync + 'static {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn EngineProcess>, LaunchError>;
}

/// Why an engine never became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    Exited(ExitReport),
    TimedOut,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::Exited(report) => write!(f, "engine {report}"),
            NotReady::TimedOut => write!(f, "engine did not open its ports in time"),
        }
    }
}

/// Wait until one of `ports` accepts a TCP connection on loopback, or the
/// process exits, or `timeout` elapses.
pub async fn wait_ready(
    process: &mut dyn EngineProcess,
    ports: &[u16],
    timeout: Duration,
) -> Result<(), NotReady> {
    let poll = async {
        loop {
            if let Some(report) = process.try_wait() {
                return Err(NotReady::Exited(report));
            }
            for &port in ports {
                if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .unwrap_or(Err(NotReady::TimedOut))
}

/// Resolve the engine binary: explicit path, else `xray`/`xray.exe` on
/// `PATH`, else the platform default location.
pub fn resolve_binary(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for name in ["xray", "xray.exe"] {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
    }
    if cfg!(windows) {
        PathBuf::from(r"C:\Program Files\Xray\xray.exe")
    } else {
        PathBuf::from("/usr/bin/xray")
    }
}

/// Launches `<binary> run -config stdin:`.
#[derive(Debug, Clone)]
pub struct XrayLauncher {
    binary: PathBuf,
    assets_dir: Option<PathBuf>,
}

impl XrayLauncher {
    pub fn new(binary: impl Into<PathBuf>, assets_dir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            assets_dir,
        }
    }

    pub fn from_settings(engine: &xs_config::EngineSettings) -> Self {
        Self::new(
            resolve_binary(engine.binary.as_deref()),
            engine.assets_dir.clone(),
        )
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl EngineLauncher for XrayLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn EngineProcess>, LaunchError> {
        let payload = serde_json::to_vec(&spec.config)
            .map_err(|e| LaunchError::Config(e.to_string()))?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(["run", "-config", "stdin:"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(assets) = &self.assets_dir {
            cmd.env("XRAY_LOCATION_ASSET", assets);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::BinaryNotFound(self.binary.clone())
            } else {
                LaunchError::Spawn {
                    binary: self.binary.clone(),
                    source: e,
                }
            }
        })?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL)));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, spec.label.clone(), tail.clone(), spec.log_hub.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, spec.label.clone(), tail.clone(), spec.log_hub.clone()));
        }

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            }
            .await;
            // An engine that rejects its config may close stdin early; the
            // exit is reported through readiness instead.
            if let Err(e) = written {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(LaunchError::Stdin(e));
                }
            }
        }

        tracing::debug!(
            target: "xswitch::engine",
            engine = %spec.label,
            pid = ?child.id(),
            binary = %self.binary.display(),
            "engine spawned"
        );

        Ok(Box::new(XrayProcess {
            pid: child.id(),
            child,
            tail,
            readers,
            label: spec.label,
        }))
    }
}

fn forward_lines<R>(
    reader: R,
    label: String,
    tail: Arc<Mutex<VecDeque<String>>>,
    hub: Option<LogHub>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!(target: "xswitch::engine", engine = %label, "{line}");
            {
                let mut tail = tail.lock();
                if tail.len() == OUTPUT_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line.to_owned());
            }
            if let Some(hub) = &hub {
                hub.publish(LogEvent::log(line));
            }
        }
    })
}

struct XrayProcess {
    child: Child,
    pid: Option<u32>,
    tail: Arc<Mutex<VecDeque<String>>>,
    readers: Vec<JoinHandle<()>>,
    label: String,
}

impl XrayProcess {
    fn report(&self, status: std::process::ExitStatus) -> ExitReport {
        ExitReport {
            code: status.code(),
            output: self.tail.lock().iter().cloned().collect(),
        }
    }

    /// Give the readers a moment to drain pipes after exit.
    async fn drain_readers(&mut self) {
        for reader in std::mem::take(&mut self.readers) {
            let _ = tokio::time::timeout(Duration::from_millis(200), reader).await;
        }
    }
}

#[async_trait]
impl EngineProcess for XrayProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> ExitReport {
        match self.child.wait().await {
            Ok(status) => {
                self.drain_readers().await;
                self.report(status)
            }
            Err(e) => ExitReport {
                code: None,
                output: vec![format!("wait failed: {e}")],
            },
        }
    }

    fn try_wait(&mut self) -> Option<ExitReport> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(self.report(status)),
            Ok(None) => None,
            Err(e) => Some(ExitReport {
                code: None,
                output: vec![format!("wait failed: {e}")],
            }),
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: plain signal delivery to a child we spawned and have not reaped.
            let _ = unsafe { libc::kill(pid, libc::SIGTERM) };
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                tracing::debug!(target: "xswitch::engine", engine = %self.label, "engine exited after SIGTERM");
                return;
            }
            tracing::warn!(
                target: "xswitch::engine",
                engine = %self.label,
                grace_ms = grace.as_millis() as u64,
                "engine ignored SIGTERM, killing"
            );
        }
        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.kill().await {
            tracing::warn!(target: "xswitch::engine", engine = %self.label, error = %e, "kill failed");
        }
    }
}

impl Drop for XrayProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
