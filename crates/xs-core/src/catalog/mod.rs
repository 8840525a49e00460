//! Read-only view of subscriptions and their servers.
//!
//! The catalog is owned by an external collaborator (CRUD, refresh, payload
//! parsing). The orchestrator only reads it, by identity.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CatalogError;

mod file;
mod memory;
mod model;

pub use file::FileCatalog;
pub use memory::MemoryCatalog;
pub use model::{Server, Subscription, UsageInfo};

#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    /// All subscriptions, in catalog order.
    async fn subscriptions(&self) -> Result<Vec<Subscription>, CatalogError>;

    async fn subscription(&self, id: Uuid) -> Result<Subscription, CatalogError>;

    /// Servers of one subscription, in catalog order.
    async fn servers(&self, subscription_id: Uuid) -> Result<Vec<Server>, CatalogError>;

    async fn server(&self, subscription_id: Uuid, server_id: Uuid) -> Result<Server, CatalogError> {
        self.servers(subscription_id)
            .await?
            .into_iter()
            .find(|s| s.id == server_id)
            .ok_or(CatalogError::ServerNotFound {
                subscription: subscription_id,
                server: server_id,
            })
    }
}
