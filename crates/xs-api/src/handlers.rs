//! HTTP handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use xs_core::engine::version::probe_version;
use xs_core::{StartOutcome, Subscription};

use crate::error::{ApiError, ApiResult};
use crate::server::ApiState;
use crate::types::*;

fn parse_id(what: &str, raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid {what} id: {raw}")))
}

/// List subscriptions in catalog order
pub async fn list_subscriptions(State(state): State<ApiState>) -> ApiResult<Json<Vec<Subscription>>> {
    let subscriptions = state.orchestrator.catalog().subscriptions().await?;
    Ok(Json(subscriptions))
}

/// Probe every server of one subscription
pub async fn url_test(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UrlTestResponse>> {
    let id = parse_id("subscription", &id)?;
    let report = state.orchestrator.url_test(id).await?;

    let message = match report.best() {
        Some(best) => format!(
            "Tested {} servers, {} reachable, fastest {} ({} ms)",
            report.total(),
            report.successful(),
            best.remarks,
            best.latency_ms().unwrap_or_default()
        ),
        None => format!("Tested {} servers, none reachable", report.total()),
    };
    Ok(Json(UrlTestResponse {
        success: true,
        message,
        subscription_id: report.subscription.id,
        subscription_name: report.subscription.name.clone(),
        total_servers: report.total(),
        successful_tests: report.successful(),
        failed_tests: report.failed(),
        results: report.results,
    }))
}

/// Start one server, replacing whatever runs
pub async fn start_server(
    State(state): State<ApiState>,
    Path((sub_id, server_id)): Path<(String, String)>,
) -> ApiResult<Json<StartResponse>> {
    let sub_id = parse_id("subscription", &sub_id)?;
    let server_id = parse_id("server", &server_id)?;
    let server = state.orchestrator.catalog().server(sub_id, server_id).await?;

    let outcome = state.orchestrator.supervisor().ensure_running(&server).await?;
    let message = match &outcome {
        StartOutcome::Started(t) => format!("Server {} started", t.remarks),
        StartOutcome::AlreadyRunning(t) => format!("Server {} is already running", t.remarks),
    };
    let tunnel = outcome.tunnel();
    Ok(Json(StartResponse {
        success: true,
        message,
        server_id: tunnel.server_id,
        status: "running",
        remarks: tunnel.remarks.clone(),
    }))
}

/// Stop the tunnel; succeeds when nothing runs
pub async fn stop_server(State(state): State<ApiState>) -> Json<StopResponse> {
    let previous = state.orchestrator.supervisor().stop().await;
    let message = match previous.remarks() {
        Some(remarks) if previous.is_running() => format!("Server {remarks} stopped"),
        _ => "No server was running".to_owned(),
    };
    Json(StopResponse {
        success: true,
        message,
        server_id: previous.server_id(),
        status: "stopped",
    })
}

/// Current tunnel snapshot
pub async fn server_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse::from(&state.orchestrator.supervisor().status()))
}

/// Connect to the fastest server of the first responsive subscription
pub async fn auto_connect(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<AutoConnectResponse>> {
    let request: AutoConnectRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AutoConnectRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };

    // Server shutdown cancels the run. A client that disconnects drops this
    // future instead, which tears down any probes in flight.
    let cancel = state.shutdown.child_token();
    let connected = state
        .orchestrator
        .auto_connect(request.subscription_ids, &cancel)
        .await?;

    Ok(Json(AutoConnectResponse {
        success: true,
        message: format!(
            "Connected to {} from {}",
            connected.tunnel.remarks, connected.subscription.name
        ),
        subscription_id: connected.subscription.id,
        subscription_name: connected.subscription.name,
        server_id: connected.tunnel.server_id,
        remarks: connected.tunnel.remarks,
        ping_ms: connected.result.latency_ms(),
        attempts: connected.attempts,
    }))
}

/// Engine availability plus the advertised status poll cadence
pub async fn engine_info(State(state): State<ApiState>) -> Json<EngineResponse> {
    let info = probe_version(&state.engine_binary).await;
    Json(EngineResponse {
        info,
        status_poll_interval_ms: state.settings.status_poll_interval_ms,
    })
}
