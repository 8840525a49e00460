//! The single active local tunnel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::AllocatedPort;

mod supervisor;

pub use supervisor::{StartOutcome, TunnelSupervisor};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunningTunnel {
    pub server_id: Uuid,
    pub subscription_id: Uuid,
    pub remarks: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub allocated_ports: Vec<AllocatedPort>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LaunchFailed,
    Crashed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TunnelFailure {
    pub server_id: Uuid,
    pub subscription_id: Uuid,
    pub remarks: String,
    pub kind: FailureKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the tunnel. Exactly one exists per supervisor.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TunnelStatus {
    #[default]
    Stopped,
    Running(RunningTunnel),
    Error(TunnelFailure),
}

impl TunnelStatus {
    /// `stopped`, `running` or `error`.
    pub fn state(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "stopped",
            TunnelStatus::Running(_) => "running",
            TunnelStatus::Error(_) => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TunnelStatus::Running(_))
    }

    pub fn running(&self) -> Option<&RunningTunnel> {
        match self {
            TunnelStatus::Running(running) => Some(running),
            _ => None,
        }
    }

    pub fn server_id(&self) -> Option<Uuid> {
        match self {
            TunnelStatus::Stopped => None,
            TunnelStatus::Running(r) => Some(r.server_id),
            TunnelStatus::Error(f) => Some(f.server_id),
        }
    }

    pub fn remarks(&self) -> Option<&str> {
        match self {
            TunnelStatus::Stopped => None,
            TunnelStatus::Running(r) => Some(&r.remarks),
            TunnelStatus::Error(f) => Some(&f.remarks),
        }
    }

    /// One-line description for status messages and the log stream.
    pub fn describe(&self) -> String {
        match self {
            TunnelStatus::Stopped => "No server is currently running".to_owned(),
            TunnelStatus::Running(r) => format!("Server {} is running", r.remarks),
            TunnelStatus::Error(f) => format!("Server {} failed: {}", f.remarks, f.reason),
        }
    }
}
