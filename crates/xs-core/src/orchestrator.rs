//! Cross-subscription auto-connect and the single-subscription url-test.
//!
//! Subscriptions are tried strictly in order. Each one's servers are probed
//! concurrently, the fastest is started, and the first success ends the run;
//! later subscriptions are never probed.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::{Catalog, Subscription};
use crate::error::OrchestrateError;
use crate::probe::{ProbeEngine, ProbeResult};
use crate::select;
use crate::tunnel::{RunningTunnel, TunnelSupervisor};

/// Why one subscription did not yield a tunnel.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Attempt {
    pub subscription_id: Uuid,
    pub subscription_name: String,
    pub reason: String,
}

/// Probe results for one subscription, in catalog order.
#[derive(Debug, Clone)]
pub struct UrlTestReport {
    pub subscription: Subscription,
    pub results: Vec<ProbeResult>,
}

impl UrlTestReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.successful()
    }

    pub fn best(&self) -> Option<&ProbeResult> {
        select::select(&self.results)
    }

    pub fn ranked(&self) -> Vec<&ProbeResult> {
        select::rank(&self.results)
    }
}

/// A successful auto-connect.
#[derive(Debug, Clone)]
pub struct Connected {
    pub subscription: Subscription,
    pub result: ProbeResult,
    pub tunnel: RunningTunnel,
    /// Subscriptions tried before the one that connected.
    pub attempts: Vec<Attempt>,
}

pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    probes: Arc<ProbeEngine>,
    supervisor: TunnelSupervisor,
}

impl Orchestrator {
    pub fn new(catalog: Arc<dyn Catalog>, probes: Arc<ProbeEngine>, supervisor: TunnelSupervisor) -> Self {
        Self {
            catalog,
            probes,
            supervisor,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn probes(&self) -> &Arc<ProbeEngine> {
        &self.probes
    }

    pub fn supervisor(&self) -> &TunnelSupervisor {
        &self.supervisor
    }

    /// Probe every server of one subscription. The tunnel is not touched.
    pub async fn url_test(&self, subscription_id: Uuid) -> Result<UrlTestReport, OrchestrateError> {
        let subscription = self.catalog.subscription(subscription_id).await?;
        let servers = self.catalog.servers(subscription_id).await?;
        tracing::info!(
            subscription = %subscription.name,
            servers = servers.len(),
            "url-test started"
        );
        let results = self.probes.probe(&servers).await;
        Ok(UrlTestReport {
            subscription,
            results,
        })
    }

    /// Connect to the fastest server of the first subscription that has a
    /// responsive one. `subscription_ids` overrides the catalog order.
    pub async fn auto_connect(
        &self,
        subscription_ids: Option<Vec<Uuid>>,
        cancel: &CancellationToken,
    ) -> Result<Connected, OrchestrateError> {
        let order = match subscription_ids {
            Some(ids) => ids,
            None => self
                .catalog
                .subscriptions()
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect(),
        };
        tracing::info!(subscriptions = order.len(), "auto-connect started");

        let mut attempts = Vec::new();
        for id in order {
            if cancel.is_cancelled() {
                return Err(self.cancelled(attempts));
            }

            let subscription = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(attempts)),
                found = self.catalog.subscription(id) => found,
            };
            let subscription = match subscription {
                Ok(s) => s,
                Err(e) => {
                    attempts.push(Attempt {
                        subscription_id: id,
                        subscription_name: String::new(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let skip = |reason: String| Attempt {
                subscription_id: subscription.id,
                subscription_name: subscription.name.clone(),
                reason,
            };

            let servers = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(attempts)),
                servers = self.catalog.servers(id) => servers,
            };
            let servers = match servers {
                Ok(servers) if servers.is_empty() => {
                    attempts.push(skip("subscription has no servers".into()));
                    continue;
                }
                Ok(servers) => servers,
                Err(e) => {
                    attempts.push(skip(e.to_string()));
                    continue;
                }
            };

            // Dropping the probe future on cancellation tears down every
            // transient engine and port it holds.
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(attempts)),
                results = self.probes.probe(&servers) => results,
            };

            let Some(best) = select::select(&results).cloned() else {
                tracing::info!(subscription = %subscription.name, tested = results.len(), "no responsive servers");
                attempts.push(skip(format!(
                    "no responsive servers ({} tested)",
                    results.len()
                )));
                continue;
            };
            let Some(server) = servers.iter().find(|s| s.id == best.server_id) else {
                attempts.push(skip(format!("server {} vanished", best.server_id)));
                continue;
            };

            if cancel.is_cancelled() {
                return Err(self.cancelled(attempts));
            }
            match self.supervisor.start(server).await {
                Ok(tunnel) => {
                    tracing::info!(
                        subscription = %subscription.name,
                        server = %server.remarks,
                        ping_ms = ?best.latency_ms(),
                        "auto-connect connected"
                    );
                    return Ok(Connected {
                        subscription,
                        result: best,
                        tunnel,
                        attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(subscription = %subscription.name, server = %server.remarks, error = %e, "start failed, trying next subscription");
                    attempts.push(skip(format!("start {} failed: {e}", server.remarks)));
                }
            }
        }

        tracing::warn!(tried = attempts.len(), "auto-connect exhausted all subscriptions");
        Err(OrchestrateError::NoResponsiveServers { attempts })
    }

    fn cancelled(&self, attempts: Vec<Attempt>) -> OrchestrateError {
        tracing::info!(tried = attempts.len(), "auto-connect cancelled");
        OrchestrateError::Cancelled { attempts }
    }
}
