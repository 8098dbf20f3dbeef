//! Scoped sub-agent delegation.
//!
//! A parent agent may hand a sub-task to a child agent. The child runs with a
//! narrowed profile (no `delegate`, nothing privileged, never wider than the
//! parent) and is disconnected as soon as its single turn is done.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agent_relay_core::{AgentReply, ArtifactRef, CapabilityProfile, Error, Operation, Result};
use agent_relay_governance::{child_profile, CapabilityPolicy, MAX_DELEGATION_DEPTH};

/// A delegation from a parent agent to a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationContext {
    /// Unique ID for this delegation.
    pub id: String,
    /// Bot identity of the parent; the child runs under the same identity.
    pub parent_bot: String,
    /// Depth of the child (1 for a direct child of a top-level agent).
    pub depth: u8,
    /// Objective for the child agent.
    pub objective: String,
    /// Operations the child may invoke.
    pub profile: CapabilityProfile,
}

impl DelegationContext {
    /// Derive a child context from a parent running at `parent_depth`.
    ///
    /// Refused when the parent lacks `delegate` or is already at the depth cap.
    pub fn spawn(
        parent_bot: &str,
        parent_profile: &CapabilityProfile,
        parent_depth: u8,
        objective: impl Into<String>,
    ) -> Result<Self> {
        if !parent_profile.contains(Operation::Delegate) || parent_depth >= MAX_DELEGATION_DEPTH {
            return Err(Error::PolicyViolation {
                bot: parent_bot.to_string(),
                operation: Operation::Delegate.to_string(),
                profile: parent_profile.to_string(),
            });
        }
        let id = Uuid::new_v4().simple().to_string();
        Ok(Self {
            id: format!("del_{}", &id[..8]),
            parent_bot: parent_bot.to_string(),
            depth: parent_depth + 1,
            objective: objective.into(),
            profile: child_profile(parent_profile),
        })
    }

    /// Directive for the child: the bot's directive under the narrowed
    /// profile, plus the objective framing.
    pub fn directive(&self, policy: &CapabilityPolicy) -> String {
        format!(
            "{}\n\nYou are a focused sub-agent working on a single delegated objective: {}\n\
             Complete it concisely and return your result.",
            policy.directive(&self.parent_bot, &self.profile),
            self.objective
        )
    }
}

/// Outcome of a delegated child turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    /// ID of the delegation.
    pub delegation_id: String,
    pub objective: String,
    /// Whether the child succeeded.
    pub success: bool,
    /// Result content from the child.
    pub result: String,
    /// Files the child produced.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Any error message.
    pub error: Option<String>,
}

impl DelegationResult {
    pub fn success(ctx: &DelegationContext, reply: AgentReply) -> Self {
        Self {
            delegation_id: ctx.id.clone(),
            objective: ctx.objective.clone(),
            success: true,
            result: reply.text,
            artifacts: reply.artifacts,
            error: None,
        }
    }

    pub fn failure(ctx: &DelegationContext, error: impl Into<String>) -> Self {
        Self {
            delegation_id: ctx.id.clone(),
            objective: ctx.objective.clone(),
            success: false,
            result: String::new(),
            artifacts: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Message fed back to the parent with the children's results.
pub fn follow_up_message(results: &[DelegationResult]) -> String {
    let mut out = String::from("Results of the sub-tasks you delegated:\n");
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("\n[{}] {}\n", i + 1, r.objective));
        if r.success {
            out.push_str(&r.result);
        } else {
            out.push_str(&format!(
                "FAILED: {}",
                r.error.as_deref().unwrap_or("unknown error")
            ));
        }
        out.push('\n');
    }
    out.push_str("\nUse these results to answer the original request.");
    out
}
