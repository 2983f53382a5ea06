//! External collaborator seams.
//!
//! The scheduler core treats everything beyond its own coordination
//! concerns as a collaborator behind an async trait: the commerce data
//! source, the credential provider, the search index sink, the
//! reconnection notifier and the store directory. Hosts implement these
//! against their real SaaS clients; tests implement them with scripted
//! doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Entity categories synchronized from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Product,
    Order,
    Customer,
}

impl EntityType {
    /// Every entity type, in fetch order.
    #[must_use]
    pub fn all() -> [EntityType; 3] {
        [Self::Product, Self::Order, Self::Customer]
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "products",
            Self::Order => "orders",
            Self::Customer => "customers",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw record from the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub fields: Value,
    /// Source-side modification time (epoch millis), when known.
    pub updated_at: Option<i64>,
}

/// One index-ready document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub namespace: String,
    pub body: Value,
}

/// Index partition for one store and entity category.
#[must_use]
pub fn namespace_for(store_id: &str, entity: EntityType) -> String {
    format!("store_{}_{}", store_id, entity.as_str())
}

/// Statistics for one index namespace.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub document_count: u64,
}

/// Fetches domain entities from the commerce platform.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch records of one entity type modified since `since`
    /// (epoch millis; `None` means a full fetch).
    async fn fetch_entities(
        &self,
        credential: &str,
        entity: EntityType,
        since: Option<i64>,
    ) -> Result<Vec<SourceRecord>, SyncError>;
}

/// Supplies a valid access credential for a store.
///
/// Refresh-on-expiry is the provider's own concern; `None` means the
/// store has no usable credential and must go through reconnection.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_valid_credential(&self, store_id: &str) -> Result<Option<String>, SyncError>;
}

/// Write side of the search index.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn upsert(&self, namespace: &str, documents: &[IndexDocument]) -> Result<(), SyncError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<(), SyncError>;

    async fn describe_stats(&self, namespace: &str) -> Result<NamespaceStats, SyncError>;
}

/// Receives the "this store needs user reconnection" signal.
///
/// The user-facing reconnection flow is external; the scheduler only
/// raises the flag, exactly once per pause transition.
#[async_trait]
pub trait ReconnectNotifier: Send + Sync {
    async fn mark_needs_reconnection(&self, store_id: &str, reason: &str) -> Result<(), SyncError>;
}

/// Store registry owned by the platform.
#[async_trait]
pub trait StoreDirectory: Send + Sync {
    /// Whether the store is still connected and active.
    async fn is_active(&self, store_id: &str) -> Result<bool, SyncError>;

    /// Record the store's last successful sync time (epoch millis).
    async fn set_last_synced(&self, store_id: &str, at: i64) -> Result<(), SyncError>;
}
