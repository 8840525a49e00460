use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Traffic and expiry reported by a subscription provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageInfo {
    /// Upload plus download, in bytes.
    pub used_traffic: u64,
    /// Byte quota; `None` when unbounded.
    #[serde(default)]
    pub total: Option<u64>,
    /// `None` when the subscription never expires.
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
}

/// A named catalog of candidate servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    pub server_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UsageInfo>,
}

/// One candidate server. `config` is the opaque engine configuration and is
/// only ever touched by the engine layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub remarks: String,
    pub config: Value,
}
