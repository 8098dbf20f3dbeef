//! Agent engine traits.
//!
//! The reasoning/tool-execution engine is opaque to the relay: it is reached
//! only through connect, invoke and disconnect.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AgentReply, CapabilityProfile, RequestContext};

/// Factory for stateful agent connections.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Open a connection for `bot_id` restricted to `profile`.
    ///
    /// `resume_id` asks the engine to continue a prior conversation. An engine
    /// that no longer accepts the id must fail rather than silently start over.
    async fn connect(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        resume_id: Option<&str>,
    ) -> Result<Box<dyn AgentHandle>>;
}

/// A live, exclusively owned agent connection.
///
/// Implementations may be backed by an OS process; `disconnect` must
/// terminate it and must be safe to call more than once.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Durable id the engine assigned to this conversation, if any.
    fn conversation_id(&self) -> Option<String>;

    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;

    /// Run one agent turn.
    async fn invoke(&self, request: &RequestContext) -> Result<AgentReply>;

    /// Release the connection and any backing worker process.
    async fn disconnect(&self) -> Result<()>;
}
