//! Connection orchestration for xswitch.
//!
//! Data flow: [`orchestrator`] reads the [`catalog`], fans out through the
//! [`probe`] engine, picks with [`select`], and commits through the
//! [`tunnel`] supervisor, whose engine output is observable on [`logs`].

pub mod catalog;
pub mod engine;
pub mod error;
pub mod logs;
pub mod orchestrator;
pub mod ports;
pub mod probe;
pub mod select;
pub mod tunnel;

pub use catalog::{Catalog, FileCatalog, MemoryCatalog, Server, Subscription, UsageInfo};
pub use engine::{AllocatedPort, EngineInfo, EngineLauncher, EngineProcess, LaunchSpec, XrayLauncher};
pub use error::{CatalogError, LaunchError, OrchestrateError, ProbeFailure, SupervisorError};
pub use logs::{LogEvent, LogHub, LogKind};
pub use orchestrator::{Attempt, Connected, Orchestrator, UrlTestReport};
pub use ports::{PortAllocator, PortLease};
pub use probe::{ProbeEngine, ProbeOutcome, ProbeResult};
pub use tunnel::{FailureKind, RunningTunnel, StartOutcome, TunnelFailure, TunnelStatus, TunnelSupervisor};

use std::sync::Arc;

use xs_config::Settings;

/// Wire a probe engine, supervisor and orchestrator sharing one port
/// allocator and one log hub.
pub fn build(
    settings: &Settings,
    catalog: Arc<dyn Catalog>,
    launcher: Arc<dyn EngineLauncher>,
    hub: LogHub,
) -> Orchestrator {
    let ports = PortAllocator::from_settings(&settings.probe);
    let probes = Arc::new(ProbeEngine::new(
        Arc::clone(&launcher),
        ports.clone(),
        settings.probe.clone(),
        settings.engine.log_level,
    ));
    let supervisor = TunnelSupervisor::new(
        launcher,
        ports,
        settings.tunnel.clone(),
        settings.engine.log_level,
        hub,
    );
    Orchestrator::new(catalog, probes, supervisor)
}
