//! Runtime rewriting of a server's engine configuration.
//!
//! The stored configuration is never modified; every launch renders a copy
//! with the inbound ports and log level for that launch.

use serde::Serialize;
use serde_json::{json, Map, Value};
use xs_config::EngineLogLevel;

use crate::error::LaunchError;

/// Local inbound ports for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundPorts {
    pub socks: u16,
    pub http: u16,
}

/// A local port opened by an engine, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AllocatedPort {
    pub port: u16,
    pub protocol: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundRole {
    Socks,
    Http,
}

fn role_of(inbound: &Value) -> Option<InboundRole> {
    let tag = inbound
        .get("tag")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    if tag.contains("socks") {
        Some(InboundRole::Socks)
    } else if tag.contains("http") {
        Some(InboundRole::Http)
    } else {
        None
    }
}

fn inbound_port(inbound: &Value) -> Option<u16> {
    inbound
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
}

/// SOCKS and HTTP ports declared by a stored configuration, if any.
pub fn declared_ports(config: &Value) -> (Option<u16>, Option<u16>) {
    let mut socks = None;
    let mut http = None;
    for inbound in config
        .get("inbounds")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match role_of(inbound) {
            Some(InboundRole::Socks) if socks.is_none() => socks = inbound_port(inbound),
            Some(InboundRole::Http) if http.is_none() => http = inbound_port(inbound),
            _ => {}
        }
    }
    (socks, http)
}

/// Render a launch configuration.
///
/// Inbounds tagged `*socks*` / `*http*` get the requested ports; a missing
/// SOCKS or HTTP inbound is added on `127.0.0.1`. `log.loglevel` is forced to
/// `log_level`.
pub fn render(
    config: &Value,
    ports: InboundPorts,
    log_level: EngineLogLevel,
) -> Result<Value, LaunchError> {
    let mut rendered = config.clone();
    let root = rendered
        .as_object_mut()
        .ok_or_else(|| LaunchError::Config("configuration is not a JSON object".into()))?;

    let inbounds = root
        .entry("inbounds")
        .or_insert_with(|| Value::Array(Vec::new()));
    let inbounds = inbounds
        .as_array_mut()
        .ok_or_else(|| LaunchError::Config("`inbounds` is not an array".into()))?;

    let mut have_socks = false;
    let mut have_http = false;
    for inbound in inbounds.iter_mut() {
        let Some(role) = role_of(inbound) else { continue };
        let Some(obj) = inbound.as_object_mut() else { continue };
        let port = match role {
            InboundRole::Socks => {
                have_socks = true;
                ports.socks
            }
            InboundRole::Http => {
                have_http = true;
                ports.http
            }
        };
        let previous = obj.insert("port".into(), json!(port));
        if previous.as_ref().and_then(Value::as_u64) != Some(u64::from(port)) {
            tracing::trace!(?previous, port, ?role, "inbound port rewritten");
        }
    }
    if !have_socks {
        inbounds.push(json!({
            "tag": "socks-in",
            "protocol": "socks",
            "listen": "127.0.0.1",
            "port": ports.socks,
            "settings": {"udp": true},
        }));
    }
    if !have_http {
        inbounds.push(json!({
            "tag": "http-in",
            "protocol": "http",
            "listen": "127.0.0.1",
            "port": ports.http,
        }));
    }

    let log = root
        .entry("log")
        .or_insert_with(|| Value::Object(Map::new()));
    match log.as_object_mut() {
        Some(log) => {
            log.insert("loglevel".into(), json!(log_level.as_str()));
        }
        None => {
            *log = json!({"loglevel": log_level.as_str()});
        }
    }

    Ok(rendered)
}

/// Protocol label for an inbound: from the tag, then the `protocol` field,
/// then `unknown`.
fn protocol_of(tag: &str, inbound: &Value) -> String {
    let tag = tag.to_ascii_lowercase();
    let from_tag = if tag.contains("socks") {
        Some("socks")
    } else if tag.contains("http") {
        Some("http")
    } else if tag.contains("trojan") {
        Some("trojan")
    } else if tag.contains("vless") {
        Some("vless")
    } else if tag.contains("vmess") {
        Some("vmess")
    } else if tag.contains("shadowsocks") || tag.contains("ss") {
        Some("shadowsocks")
    } else {
        None
    };
    from_tag
        .or_else(|| inbound.get("protocol").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_owned()
}

/// Every inbound with a port, in declaration order.
pub fn allocated_ports(config: &Value) -> Vec<AllocatedPort> {
    config
        .get("inbounds")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|inbound| {
            let port = inbound_port(inbound)?;
            let tag = inbound
                .get("tag")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty());
            Some(AllocatedPort {
                port,
                protocol: protocol_of(tag.unwrap_or_default(), inbound),
                tag: tag.map(str::to_owned),
            })
        })
        .collect()
}
