//! Builders for catalogs, servers and settings used across test suites.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use xs_config::Settings;
use xs_core::{MemoryCatalog, Server, Subscription};

/// Settings with short timeouts and a private probe port range.
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.probe.timeout_ms = 1_000;
    settings.tunnel.ready_timeout_ms = 1_000;
    settings.tunnel.stop_grace_ms = 200;
    let (start, end) = probe_range(64);
    settings.probe.port_range_start = start;
    settings.probe.port_range_end = end;
    let [socks, http] = free_ports();
    settings.tunnel.socks_port = Some(socks);
    settings.tunnel.http_port = Some(http);
    settings
}

/// A pseudo-random `len`-port window above 20000, so parallel test binaries
/// rarely overlap.
pub fn probe_range(len: u16) -> (u16, u16) {
    let seed = Uuid::new_v4().as_u128();
    let start = 20_000 + (seed % 30_000) as u16;
    (start, start + len - 1)
}

/// Two ports currently free on loopback.
pub fn free_ports() -> [u16; 2] {
    let a = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let b = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    [
        a.local_addr().unwrap().port(),
        b.local_addr().unwrap().port(),
    ]
}

/// A server whose mock engine answers after `delay_ms`.
pub fn server(remarks: &str, delay_ms: u64) -> Server {
    scripted(remarks, json!({ "delay_ms": delay_ms }))
}

/// A server whose mock engine never answers.
pub fn hanging(remarks: &str) -> Server {
    scripted(remarks, json!({ "hang": true }))
}

/// A server with an arbitrary mock script (see [`crate::engine`]).
pub fn scripted(remarks: &str, script: Value) -> Server {
    Server {
        id: Uuid::new_v4(),
        subscription_id: Uuid::nil(),
        remarks: remarks.to_owned(),
        config: json!({
            "inbounds": [
                {"tag": "socks-in", "protocol": "socks", "listen": "127.0.0.1", "port": 10808},
                {"tag": "http-in", "protocol": "http", "listen": "127.0.0.1", "port": 10809}
            ],
            "outbounds": [{"protocol": "vless", "tag": "proxy"}],
            "mock": script,
        }),
    }
}

pub fn subscription(name: &str) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        url: format!("https://{name}.example/sub"),
        last_updated: Some(Utc::now()),
        server_count: 0,
        user_info: None,
    }
}

/// A memory catalog holding the given subscriptions in order. Returns the
/// subscriptions with their final ids and server counts.
pub fn catalog(entries: Vec<(&str, Vec<Server>)>) -> (Arc<MemoryCatalog>, Vec<Subscription>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let mut subs = Vec::new();
    for (name, servers) in entries {
        let mut sub = subscription(name);
        sub.server_count = servers.len();
        catalog.insert(sub.clone(), servers);
        subs.push(sub);
    }
    (catalog, subs)
}
