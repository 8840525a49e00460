use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Catalog, Server, Subscription};
use crate::error::CatalogError;

/// In-memory catalog for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<Vec<(Subscription, Vec<Server>)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription. `server_count` is taken from `servers` and every
    /// server is re-parented to the subscription.
    pub fn insert(&self, mut subscription: Subscription, mut servers: Vec<Server>) {
        subscription.server_count = servers.len();
        for server in &mut servers {
            server.subscription_id = subscription.id;
        }
        let mut entries = self.entries.write();
        entries.retain(|(s, _)| s.id != subscription.id);
        entries.push((subscription, servers));
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(s, _)| s.id != id);
        entries.len() != before
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn subscriptions(&self) -> Result<Vec<Subscription>, CatalogError> {
        Ok(self.entries.read().iter().map(|(s, _)| s.clone()).collect())
    }

    async fn subscription(&self, id: Uuid) -> Result<Subscription, CatalogError> {
        self.entries
            .read()
            .iter()
            .find(|(s, _)| s.id == id)
            .map(|(s, _)| s.clone())
            .ok_or(CatalogError::SubscriptionNotFound(id))
    }

    async fn servers(&self, subscription_id: Uuid) -> Result<Vec<Server>, CatalogError> {
        self.entries
            .read()
            .iter()
            .find(|(s, _)| s.id == subscription_id)
            .map(|(_, servers)| servers.clone())
            .ok_or(CatalogError::SubscriptionNotFound(subscription_id))
    }
}
