use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Session Identity
// =============================================================================

/// Identifies at most one live agent handle: a conversation scope (room,
/// channel) paired with the bot identity serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    scope_id: String,
    bot_id: String,
}

impl SessionKey {
    pub fn new(scope_id: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            bot_id: bot_id.into(),
        }
    }

    /// Conversation scope (e.g. chat room id).
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Configured bot identity.
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_id, self.bot_id)
    }
}

/// How an acquisition was satisfied, in increasing order of cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquireStrategy {
    /// Live handle reused.
    Hot,
    /// New handle resuming a persisted conversation.
    Warm,
    /// Brand-new handle.
    Cold,
}

impl AcquireStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            AcquireStrategy::Hot => "hot",
            AcquireStrategy::Warm => "warm",
            AcquireStrategy::Cold => "cold",
        }
    }
}

/// Why a session entry was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Idle longer than the TTL, or the handle reported itself disconnected.
    Expired,
    /// Explicit invalidate after an engine error.
    Invalidated,
    /// Process shutdown drain.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Expired => "expired",
            CloseReason::Invalidated => "invalidated",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Point-in-time view of a cached session, for the admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub conversation_id: Option<String>,
    pub query_count: u64,
    pub idle_secs: u64,
    pub age_secs: u64,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_identity() {
        let a = SessionKey::new("room-1", "helper");
        let b = SessionKey::new("room-1", "helper");
        let c = SessionKey::new("room-1", "reviewer");

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.to_string(), "room-1/helper");
        assert_eq!(a.scope_id(), "room-1");
        assert_eq!(a.bot_id(), "helper");
    }
}
