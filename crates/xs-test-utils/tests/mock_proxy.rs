use std::time::{Duration, Instant};

use xs_test_utils::http::{start_mock_http_proxy, Responder};

fn client_via(addr: std::net::SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(format!("http://{addr}")).unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn answers_any_target_with_scripted_status() {
    let (addr, task) = start_mock_http_proxy(Responder {
        status: 204,
        delay: Duration::from_millis(50),
        ..Responder::default()
    })
    .await
    .unwrap();

    let started = Instant::now();
    let resp = client_via(addr)
        .get("http://www.gstatic.com/generate_204")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    assert!(started.elapsed() >= Duration::from_millis(50));
    task.abort();
}

#[tokio::test]
async fn non_success_status_passes_through() {
    let (addr, task) = start_mock_http_proxy(Responder {
        status: 502,
        ..Responder::default()
    })
    .await
    .unwrap();
    let resp = client_via(addr)
        .get("http://example.invalid/")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    task.abort();
}

#[tokio::test]
async fn bare_connections_are_tolerated() {
    let (addr, task) = start_mock_http_proxy(Responder::default()).await.unwrap();
    drop(tokio::net::TcpStream::connect(addr).await.unwrap());
    let resp = client_via(addr)
        .get("http://example.invalid/")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    task.abort();
}
