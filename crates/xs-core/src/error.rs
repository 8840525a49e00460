use std::{io, path::PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::orchestrator::Attempt;

/// Failures of the read-only subscription catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("subscription {0} not found")]
    SubscriptionNotFound(Uuid),

    #[error("server {server} not found in subscription {subscription}")]
    ServerNotFound { subscription: Uuid, server: Uuid },

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Failures spawning an engine process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("engine binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("spawn {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid engine config: {0}")]
    Config(String),

    #[error("write engine config: {0}")]
    Stdin(#[source] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Why a single probe did not produce a latency.
///
/// Rendered verbatim into `ProbeResult.error`, so the `Display` strings are
/// part of the wire contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("timeout")]
    Timeout,

    #[error("engine failed to start: {0}")]
    EngineStart(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("handshake failure: {0}")]
    HandshakeFailure(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("test request failed: {0}")]
    TestRequestFailed(String),
}

/// Operation-fatal failures of the tunnel supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("port {port} is unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    #[error("engine launch failed: {0}")]
    EngineLaunchFailed(String),

    #[error("engine crashed: {0}")]
    EngineCrashed(String),
}

impl From<LaunchError> for SupervisorError {
    fn from(err: LaunchError) -> Self {
        SupervisorError::EngineLaunchFailed(err.to_string())
    }
}

/// Failures of url-test and auto-connect.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("no responsive servers in any subscription")]
    NoResponsiveServers { attempts: Vec<Attempt> },

    #[error("cancelled")]
    Cancelled { attempts: Vec<Attempt> },
}

impl OrchestrateError {
    /// Per-subscription attempts recorded before the operation gave up.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::NoResponsiveServers { attempts } | Self::Cancelled { attempts } => attempts,
            Self::Catalog(_) => &[],
        }
    }
}
