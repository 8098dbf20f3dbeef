//! Wire protocol between the host and a worker process.
//!
//! One JSON object per line on the worker's stdin/stdout, tagged by `type`.

use serde::{Deserialize, Serialize};

use agent_relay_core::{AgentReply, CapabilityProfile, RequestContext};

/// Messages written to the worker.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage<'a> {
    /// First message after spawn.
    Start {
        bot_id: &'a str,
        profile: &'a CapabilityProfile,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_id: Option<&'a str>,
    },
    /// One conversational turn.
    Query(&'a RequestContext),
    /// Answer to a worker `authorize` request.
    Authorization {
        id: u64,
        allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Shutdown,
}

/// Messages read from the worker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Handshake complete.
    Ready {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// The worker wants to perform a tool operation. The tag is kept raw so
    /// an unknown operation is denied instead of failing the turn.
    Authorize { id: u64, operation: String },
    /// Final answer for the current turn.
    Reply(AgentReply),
    /// The worker could not complete the turn.
    Error { message: String },
}

impl HostMessage<'_> {
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
