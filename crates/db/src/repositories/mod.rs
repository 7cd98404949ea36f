use async_trait::async_trait;
use thiserror::Error;

use skillrelay_core::domain::activity::ConversationKey;
use skillrelay_core::domain::correlation::{CorrelationEntry, RoutingKey};
use skillrelay_core::domain::router_state::RouterState;

pub mod correlation;
pub mod memory;
pub mod router_state;

pub use correlation::SqlCorrelationRepository;
pub use memory::{InMemoryCorrelationRepository, InMemoryRouterStateRepository};
pub use router_state::SqlRouterStateRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable map from routing key to parent conversation. At most one entry exists per
/// (channel, parent conversation, skill).
#[async_trait]
pub trait CorrelationRepository: Send + Sync {
    async fn find(&self, routing_key: &RoutingKey)
        -> Result<Option<CorrelationEntry>, RepositoryError>;

    /// Inserts or refreshes. An existing entry keeps its `created_at`; any stale entry for
    /// the same (parent, skill) under a different key is replaced.
    async fn save(&self, entry: CorrelationEntry) -> Result<(), RepositoryError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, routing_key: &RoutingKey) -> Result<bool, RepositoryError>;

    async fn delete_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<u64, RepositoryError>;

    async fn list_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<CorrelationEntry>, RepositoryError>;
}

#[async_trait]
pub trait RouterStateRepository: Send + Sync {
    async fn load(&self, key: &ConversationKey) -> Result<Option<RouterState>, RepositoryError>;
    async fn save(&self, key: &ConversationKey, state: &RouterState)
        -> Result<(), RepositoryError>;
    async fn delete(&self, key: &ConversationKey) -> Result<bool, RepositoryError>;
}
