//! Request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xs_core::{AllocatedPort, Attempt, EngineInfo, ProbeResult, TunnelStatus};

/// Response to `POST /subscriptions/:id/url-test`
#[derive(Debug, Serialize)]
pub struct UrlTestResponse {
    pub success: bool,
    pub message: String,
    pub subscription_id: Uuid,
    pub subscription_name: String,
    pub total_servers: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    pub results: Vec<ProbeResult>,
}

/// Response to `POST /subscriptions/:sub_id/servers/:server_id/start`
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub server_id: Uuid,
    pub status: &'static str,
    pub remarks: String,
}

/// Response to `POST /subscriptions/server/stop`
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
    pub server_id: Option<Uuid>,
    pub status: &'static str,
}

/// Response to `GET /subscriptions/server/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
    pub server_id: Option<Uuid>,
    pub status: &'static str,
    pub remarks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_ports: Option<Vec<AllocatedPort>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TunnelStatus> for StatusResponse {
    fn from(status: &TunnelStatus) -> Self {
        let running = status.running();
        Self {
            success: true,
            message: status.describe(),
            server_id: status.server_id(),
            status: status.state(),
            remarks: status.remarks().map(str::to_owned),
            process_id: running.and_then(|r| r.pid),
            start_time: running.map(|r| r.started_at),
            allocated_ports: running.map(|r| r.allocated_ports.clone()),
            error: match status {
                TunnelStatus::Error(f) => Some(f.reason.clone()),
                _ => None,
            },
        }
    }
}

/// Optional body of `POST /subscriptions/auto-connect`
#[derive(Debug, Default, Deserialize)]
pub struct AutoConnectRequest {
    #[serde(default)]
    pub subscription_ids: Option<Vec<Uuid>>,
}

/// Response to a successful auto-connect
#[derive(Debug, Serialize)]
pub struct AutoConnectResponse {
    pub success: bool,
    pub message: String,
    pub subscription_id: Uuid,
    pub subscription_name: String,
    pub server_id: Uuid,
    pub remarks: String,
    pub ping_ms: Option<u64>,
    pub attempts: Vec<Attempt>,
}

/// Response to `GET /system/engine`
#[derive(Debug, Serialize)]
pub struct EngineResponse {
    #[serde(flatten)]
    pub info: EngineInfo,
    pub status_poll_interval_ms: u64,
}
