//! Persistence traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::SessionKey;

/// Durable `SessionKey -> conversation id` mapping that survives restarts and
/// enables Warm resumes.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Conversation id recorded for `key`, if any.
    async fn load(&self, key: &SessionKey) -> Result<Option<String>>;

    /// Record (or replace) the conversation id for `key`.
    async fn save(&self, key: &SessionKey, conversation_id: &str) -> Result<()>;

    /// Forget `key`. Returns whether an id was present.
    async fn remove(&self, key: &SessionKey) -> Result<bool>;
}
