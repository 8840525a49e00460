use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use xs_config::Settings;
use xs_core::{LogHub, OrchestrateError, Orchestrator, TunnelStatus};
use xs_test_utils::{fixtures, MockLauncher};

fn orchestrator(
    catalog: Arc<xs_core::MemoryCatalog>,
    launcher: &Arc<MockLauncher>,
    settings: &Settings,
) -> Orchestrator {
    xs_core::build(settings, catalog, launcher.clone(), LogHub::default())
}

#[tokio::test]
async fn first_responsive_subscription_wins_and_later_ones_are_skipped() {
    let launcher = Arc::new(MockLauncher::new());
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 400;
    let (catalog, subs) = fixtures::catalog(vec![
        (
            "s1",
            vec![
                fixtures::hanging("s1-a"),
                fixtures::scripted("s1-b", json!({"status": 503})),
            ],
        ),
        (
            "s2",
            vec![
                fixtures::hanging("s2-a"),
                fixtures::server("s2-b", 80),
                fixtures::scripted("s2-c", json!({"exit_code": 1})),
            ],
        ),
        ("s3", vec![fixtures::server("s3-a", 1), fixtures::server("s3-b", 1)]),
    ]);
    let orch = orchestrator(catalog, &launcher, &settings);

    let connected = orch
        .auto_connect(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connected.subscription.id, subs[1].id);
    assert_eq!(connected.result.remarks, "s2-b");
    assert!(connected.result.latency_ms().unwrap() >= 80);
    assert_eq!(connected.tunnel.remarks, "s2-b");
    assert_eq!(connected.attempts.len(), 1);
    assert_eq!(connected.attempts[0].subscription_id, subs[0].id);
    assert_eq!(connected.attempts[0].reason, "no responsive servers (2 tested)");

    let launched = launcher.launched();
    assert!(launched.iter().all(|l| !l.contains("s3")), "{launched:?}");
    assert_eq!(launched.last().map(String::as_str), Some("s2-b"));

    let status = orch.supervisor().status();
    assert_eq!(status.remarks(), Some("s2-b"));
    orch.supervisor().stop().await;
}

#[tokio::test]
async fn exhaustion_reports_every_subscription() {
    let launcher = Arc::new(MockLauncher::new());
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 300;
    let (catalog, subs) = fixtures::catalog(vec![
        ("empty", vec![]),
        ("dead", vec![fixtures::hanging("d1")]),
    ]);
    let orch = orchestrator(catalog, &launcher, &settings);

    let err = orch
        .auto_connect(None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "no responsive servers in any subscription");
    match &err {
        OrchestrateError::NoResponsiveServers { attempts } => {
            let reasons: Vec<_> = attempts.iter().map(|a| a.reason.as_str()).collect();
            assert_eq!(
                reasons,
                vec!["subscription has no servers", "no responsive servers (1 tested)"]
            );
            assert_eq!(attempts[1].subscription_name, "dead");
            assert_eq!(attempts[1].subscription_id, subs[1].id);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(orch.supervisor().status(), TunnelStatus::Stopped);
    assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn explicit_order_is_honoured_and_unknown_ids_are_skipped() {
    let launcher = Arc::new(MockLauncher::new());
    let settings = fixtures::settings();
    let (catalog, subs) = fixtures::catalog(vec![
        ("first", vec![fixtures::server("f", 1)]),
        ("second", vec![fixtures::server("s", 1)]),
    ]);
    let orch = orchestrator(catalog, &launcher, &settings);
    let missing = Uuid::new_v4();

    let connected = orch
        .auto_connect(Some(vec![missing, subs[1].id, subs[0].id]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connected.subscription.name, "second");
    assert_eq!(connected.attempts.len(), 1);
    assert_eq!(connected.attempts[0].subscription_id, missing);
    assert!(connected.attempts[0].reason.contains(&missing.to_string()));
    assert!(launcher.launched().iter().all(|l| l != "probe:f"));
    orch.supervisor().stop().await;
}

#[tokio::test]
async fn start_failure_is_recorded_and_the_run_continues() {
    let launcher = Arc::new(MockLauncher::new());
    let settings = fixtures::settings();
    let (catalog, _subs) = fixtures::catalog(vec![
        ("one", vec![fixtures::server("a", 1)]),
        ("two", vec![fixtures::server("b", 1)]),
    ]);
    let orch = orchestrator(catalog, &launcher, &settings);
    let _squatter =
        TcpListener::bind((Ipv4Addr::LOCALHOST, settings.tunnel.socks_port.unwrap())).unwrap();

    let err = orch
        .auto_connect(None, &CancellationToken::new())
        .await
        .unwrap_err();

    let attempts = err.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].reason.starts_with("start a failed"), "{}", attempts[0].reason);
    assert!(attempts[1].reason.starts_with("start b failed"), "{}", attempts[1].reason);
    assert_eq!(orch.supervisor().status(), TunnelStatus::Stopped);
}

#[tokio::test]
async fn cancellation_stops_probing_promptly() {
    let launcher = Arc::new(MockLauncher::new());
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 5_000;
    let (catalog, _subs) = fixtures::catalog(vec![
        ("slow", vec![fixtures::hanging("h1"), fixtures::hanging("h2")]),
        ("never", vec![fixtures::server("n", 1)]),
    ]);
    let orch = orchestrator(catalog, &launcher, &settings);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = orch.auto_connect(None, &cancel).await.unwrap_err();
    assert!(matches!(err, OrchestrateError::Cancelled { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(launcher.live(), 0);
    assert_eq!(orch.probes().ports().leased_count(), 0);
    assert!(launcher.launched().iter().all(|l| l != "probe:n"));
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let launcher = Arc::new(MockLauncher::new());
    let settings = fixtures::settings();
    let (catalog, _subs) = fixtures::catalog(vec![("s", vec![fixtures::server("a", 1)])]);
    let orch = orchestrator(catalog, &launcher, &settings);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orch.auto_connect(None, &cancel).await.unwrap_err();
    assert!(err.attempts().is_empty());
    assert!(launcher.launched().is_empty());
}

#[tokio::test]
async fn url_test_reports_without_touching_the_tunnel() {
    let launcher = Arc::new(MockLauncher::new());
    let mut settings = fixtures::settings();
    settings.probe.timeout_ms = 300;
    let (catalog, subs) = fixtures::catalog(vec![(
        "mixed",
        vec![
            fixtures::server("fast", 5),
            fixtures::hanging("stuck"),
            fixtures::server("slower", 60),
        ],
    )]);
    let orch = orchestrator(catalog, &launcher, &settings);

    let report = orch.url_test(subs[0].id).await.unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.successful(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.best().map(|r| r.remarks.as_str()), Some("fast"));
    let ranked: Vec<_> = report.ranked().iter().map(|r| r.remarks.clone()).collect();
    assert_eq!(ranked, vec!["fast", "slower"]);
    assert_eq!(orch.supervisor().status(), TunnelStatus::Stopped);

    let missing = orch.url_test(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, OrchestrateError::Catalog(_)));
}
