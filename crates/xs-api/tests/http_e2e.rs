//! HTTP end-to-end tests: the real router on an ephemeral port, a mock engine
//! behind it, driven with reqwest.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use xs_api::{ApiServer, ApiState};
use xs_config::Settings;
use xs_core::{LogHub, Subscription};
use xs_test_utils::{fixtures, MockLauncher};

struct TestServer {
    base_url: String,
    client: Client,
    launcher: Arc<MockLauncher>,
    subs: Vec<Subscription>,
    stop: Option<oneshot::Sender<()>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(entries: Vec<(&str, Vec<xs_core::Server>)>) -> Self {
        Self::start_with(fixtures::settings(), entries).await
    }

    async fn start_with(mut settings: Settings, entries: Vec<(&str, Vec<xs_core::Server>)>) -> Self {
        settings.engine.binary = Some("/nonexistent/xswitch-test/xray".into());
        let launcher = Arc::new(MockLauncher::new());
        let (catalog, subs) = fixtures::catalog(entries);
        let orchestrator = Arc::new(xs_core::build(
            &settings,
            catalog,
            launcher.clone(),
            LogHub::default(),
        ));
        let server = ApiServer::new(ApiState::new(orchestrator, &settings));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stopped.await;
            };
            let _ = server.serve_on(listener, shutdown).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            client: Client::new(),
            launcher,
            subs,
            stop: Some(stop),
            _handle: handle,
        }
    }

    /// Begin a graceful shutdown.
    fn shut_down(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn lists_subscriptions_in_catalog_order() {
    let server = TestServer::start(vec![
        ("alpha", vec![fixtures::server("a1", 1), fixtures::server("a2", 1)]),
        ("beta", vec![]),
    ])
    .await;

    let (status, body) = server.get("/subscriptions").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["name"], "alpha");
    assert_eq!(list[0]["server_count"], 2);
    assert_eq!(list[1]["id"], server.subs[1].id.to_string());
    assert!(list[0].get("user_info").is_none());
}

#[tokio::test]
async fn url_test_reports_every_server() {
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 300;
    let server = TestServer::start_with(
        settings,
        vec![(
            "mixed",
            vec![
                fixtures::server("ok", 10),
                fixtures::hanging("stuck"),
                fixtures::scripted("blocked", json!({"status": 403})),
            ],
        )],
    )
    .await;
    let id = server.subs[0].id;

    let (status, body) = server.post(&format!("/subscriptions/{id}/url-test"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["subscription_name"], "mixed");
    assert_eq!(body["total_servers"], 3);
    assert_eq!(body["successful_tests"], 1);
    assert_eq!(body["failed_tests"], 2);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["remarks"], "ok");
    assert_eq!(results[0]["success"], true);
    assert!(results[0]["ping_ms"].as_u64().unwrap() > 0);
    assert!(results[0]["error"].is_null());
    assert_eq!(results[1]["error"], "timeout");
    assert!(results[1]["ping_ms"].is_null());
    assert_eq!(results[2]["error"], "HTTP 403");
    assert!(results[2]["socks_port"].is_u64());

    let (status, _) = server.get("/subscriptions/server/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.launcher.launched().iter().all(|l| l.starts_with("probe:")));
}

#[tokio::test]
async fn url_test_rejects_bad_and_unknown_ids() {
    let server = TestServer::start(vec![]).await;

    let (status, body) = server.post("/subscriptions/not-a-uuid/url-test", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 400);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = server
        .post(&format!("/subscriptions/{missing}/url-test"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(&missing.to_string()));
}

#[tokio::test]
async fn start_status_stop_lifecycle() {
    let target = fixtures::server("tokyo", 1);
    let server_id = target.id;
    let server = TestServer::start(vec![("main", vec![target])]).await;
    let sub_id = server.subs[0].id;
    let start_path = format!("/subscriptions/{sub_id}/servers/{server_id}/start");

    let (_, body) = server.get("/subscriptions/server/status").await;
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["message"], "No server is currently running");
    assert!(body.get("process_id").is_none());

    let (status, body) = server.post(&start_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["remarks"], "tokyo");
    assert_eq!(body["message"], "Server tokyo started");

    let (_, body) = server.get("/subscriptions/server/status").await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["server_id"], server_id.to_string());
    assert!(body["process_id"].is_u64());
    assert!(body["start_time"].is_string());
    let ports = body["allocated_ports"].as_array().unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0]["protocol"], "socks");
    assert_eq!(ports[1]["protocol"], "http");

    let (status, body) = server.post(&start_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Server tokyo is already running");
    assert_eq!(server.launcher.launched().len(), 1);

    let (_, body) = server.post("/subscriptions/server/stop", None).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["message"], "Server tokyo stopped");

    let (status, body) = server.post("/subscriptions/server/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No server was running");
    assert_eq!(server.launcher.live(), 0);
}

#[tokio::test]
async fn start_unknown_server_is_not_found() {
    let server = TestServer::start(vec![("main", vec![fixtures::server("a", 1)])]).await;
    let sub_id = server.subs[0].id;
    let missing = uuid::Uuid::new_v4();

    let (status, body) = server
        .post(&format!("/subscriptions/{sub_id}/servers/{missing}/start"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert!(server.launcher.launched().is_empty());
}

#[tokio::test]
async fn auto_connect_picks_first_responsive_subscription() {
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 300;
    let server = TestServer::start_with(
        settings,
        vec![
            ("dead", vec![fixtures::hanging("d")]),
            ("live", vec![fixtures::server("slow", 120), fixtures::server("fast", 10)]),
        ],
    )
    .await;

    let (status, body) = server.post("/subscriptions/auto-connect", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["subscription_name"], "live");
    assert_eq!(body["remarks"], "fast");
    assert!(body["ping_ms"].as_u64().unwrap() > 0);
    let attempts = body["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["subscription_name"], "dead");

    let (_, status_body) = server.get("/subscriptions/server/status").await;
    assert_eq!(status_body["remarks"], "fast");
    server.post("/subscriptions/server/stop", None).await;
}

#[tokio::test]
async fn auto_connect_exhaustion_is_service_unavailable() {
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 200;
    let server = TestServer::start_with(
        settings,
        vec![
            ("one", vec![fixtures::hanging("x")]),
            ("two", vec![fixtures::scripted("y", json!({"status": 502}))]),
        ],
    )
    .await;
    let only = server.subs[1].id;

    let (status, body) = server
        .post(
            "/subscriptions/auto-connect",
            Some(json!({ "subscription_ids": [only] })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no responsive servers in any subscription");
    let attempts = body["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["subscription_id"], only.to_string());
    assert!(server.launcher.launched().iter().all(|l| l != "probe:x"));
}

#[tokio::test]
async fn auto_connect_rejects_malformed_body() {
    let server = TestServer::start(vec![]).await;
    let resp = server
        .client
        .post(format!("{}/subscriptions/auto-connect", server.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn engine_endpoint_reports_missing_binary_and_poll_interval() {
    let server = TestServer::start(vec![]).await;
    let (status, body) = server.get("/system/engine").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert!(body["error"].as_str().unwrap().contains("not found"));
    assert_eq!(body["status_poll_interval_ms"], 3000);
    assert!(body.get("version").is_none());
}

async fn read_until(resp: &mut reqwest::Response, buf: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !buf.contains(needle) {
            match resp.chunk().await.unwrap() {
                Some(chunk) => buf.push_str(&String::from_utf8_lossy(&chunk)),
                None => panic!("stream ended before {needle:?}: {buf}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}: {buf}"));
}

#[tokio::test]
async fn log_stream_greets_then_forwards_lifecycle_events() {
    let target = fixtures::server("osaka", 1);
    let server_id = target.id;
    let server = TestServer::start(vec![("main", vec![target])]).await;
    let sub_id = server.subs[0].id;

    let mut resp = server
        .client
        .get(format!("{}/logs/stream", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut buf = String::new();
    read_until(&mut resp, &mut buf, "No server is currently running").await;
    assert!(buf.starts_with("event: info"), "{buf}");

    server
        .post(&format!("/subscriptions/{sub_id}/servers/{server_id}/start"), None)
        .await;
    read_until(&mut resp, &mut buf, "Server osaka started").await;
    read_until(&mut resp, &mut buf, "event: log").await;

    server.post("/subscriptions/server/stop", None).await;
    read_until(&mut resp, &mut buf, "Server osaka stopped").await;
    assert!(buf.contains("\"timestamp\""));
}

#[tokio::test]
async fn shutdown_cancels_auto_connect_and_ends_log_streams() {
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 10_000;
    let mut server = TestServer::start_with(settings, vec![("slow", vec![fixtures::hanging("h")])]).await;

    let mut logs = server
        .client
        .get(format!("{}/logs/stream", server.base_url))
        .send()
        .await
        .unwrap();
    let mut buf = String::new();
    read_until(&mut logs, &mut buf, "No server is currently running").await;

    let pending = tokio::spawn(
        server
            .client
            .post(format!("{}/subscriptions/auto-connect", server.base_url))
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.shut_down();

    let resp = tokio::time::timeout(Duration::from_secs(3), pending)
        .await
        .expect("auto-connect answered before its probe timeout")
        .unwrap()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "cancelled");
    assert_eq!(server.launcher.live(), 0);

    let ended = tokio::time::timeout(Duration::from_secs(3), async {
        while let Ok(Some(chunk)) = logs.chunk().await {
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await;
    assert!(ended.is_ok(), "log stream still open: {buf}");
}
