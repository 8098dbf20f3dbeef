use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::capability::CapabilityProfile;
use super::session::SessionKey;

// =============================================================================
// Request Types
// =============================================================================

/// A chat message after transport parsing, ready for orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Trace ID for correlating logs.
    pub trace_id: String,
    /// Conversation scope (room / channel).
    pub scope_id: String,
    /// Bot identity addressed by the message.
    pub bot_id: String,
    /// Message text.
    pub text: String,
    /// Sender, if the transport knows it.
    pub sender: Option<String>,
}

impl InboundMessage {
    /// Create a message with a fresh trace ID.
    pub fn new(
        scope_id: impl Into<String>,
        bot_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            scope_id: scope_id.into(),
            bot_id: bot_id.into(),
            text: text.into(),
            sender: None,
        }
    }

    /// Set the sender.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Session key this message belongs to.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.scope_id, &self.bot_id)
    }
}

/// Everything an agent handle needs for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub trace_id: String,
    pub key: SessionKey,
    pub message: String,
    pub sender: Option<String>,
    /// Behavioral directive, including the privileged-operation prohibition.
    pub directive: String,
    /// Operations the agent may invoke this turn.
    pub profile: CapabilityProfile,
}

// =============================================================================
// Reply Types
// =============================================================================

/// A file the agent produced and wants to hand to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub display_name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ArtifactRef {
    pub fn new(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
            mime_type: None,
        }
    }
}

/// Result of one agent turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Sub-task objectives the agent asked to hand to a child agent.
    #[serde(default)]
    pub delegations: Vec<String>,
}

impl AgentReply {
    /// Plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Attach an artifact.
    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Attach a delegation request.
    pub fn with_delegation(mut self, objective: impl Into<String>) -> Self {
        self.delegations.push(objective.into());
        self
    }
}

/// A registered artifact as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub token: String,
    pub url: String,
    pub display_name: String,
    pub mime_type: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Final outcome of orchestrating one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratedReply {
    pub trace_id: String,
    pub text: String,
    pub downloads: Vec<DownloadLink>,
    pub strategy: super::session::AcquireStrategy,
    pub query_count: u64,
}
