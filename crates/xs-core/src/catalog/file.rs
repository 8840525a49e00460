use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{Catalog, Server, Subscription, UsageInfo};
use crate::error::CatalogError;

/// Catalog backed by a JSON document written by the catalog owner:
///
/// ```json
/// { "subscriptions": [ { "id": "...", "name": "...", "url": "...",
///   "servers": [ { "id": "...", "remarks": "...", "raw": { ... } } ] } ] }
/// ```
///
/// The file is re-read on every call, since the owner may rewrite it at any
/// time.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    id: Uuid,
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    user_info: Option<UsageInfo>,
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: Uuid,
    #[serde(default)]
    remarks: String,
    #[serde(alias = "config")]
    raw: Value,
}

impl SubscriptionEntry {
    fn summary(&self) -> Subscription {
        Subscription {
            id: self.id,
            name: self.name.clone(),
            url: self.url.clone(),
            last_updated: self.last_updated,
            server_count: self.servers.len(),
            user_info: self.user_info.clone(),
        }
    }

    fn into_servers(self) -> Vec<Server> {
        let subscription_id = self.id;
        self.servers
            .into_iter()
            .map(|s| Server {
                id: s.id,
                subscription_id,
                remarks: s.remarks,
                config: s.raw,
            })
            .collect()
    }
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document, CatalogError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CatalogError::Unavailable(format!("read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            CatalogError::Unavailable(format!("parse {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn subscriptions(&self) -> Result<Vec<Subscription>, CatalogError> {
        let doc = self.read().await?;
        Ok(doc.subscriptions.iter().map(SubscriptionEntry::summary).collect())
    }

    async fn subscription(&self, id: Uuid) -> Result<Subscription, CatalogError> {
        let doc = self.read().await?;
        doc.subscriptions
            .iter()
            .find(|s| s.id == id)
            .map(SubscriptionEntry::summary)
            .ok_or(CatalogError::SubscriptionNotFound(id))
    }

    async fn servers(&self, subscription_id: Uuid) -> Result<Vec<Server>, CatalogError> {
        let doc = self.read().await?;
        doc.subscriptions
            .into_iter()
            .find(|s| s.id == subscription_id)
            .map(SubscriptionEntry::into_servers)
            .ok_or(CatalogError::SubscriptionNotFound(subscription_id))
    }
}
