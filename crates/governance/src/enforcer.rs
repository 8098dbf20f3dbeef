//! Structural enforcement of capability profiles.
//!
//! The agent engine calls the gate before it performs any tool operation. A
//! denial is logged, counted and audited, and surfaces to the engine as
//! [`Error::PolicyViolation`].

use async_trait::async_trait;
use std::sync::Arc;

use agent_relay_core::{CapabilityProfile, Error, Operation, OperationGate, Result};

use crate::audit::{AuditEntry, AuditOutcome, AuditStore};

/// [`OperationGate`] backed by an audit store.
pub struct CapabilityEnforcer {
    audit: Arc<dyn AuditStore>,
}

impl CapabilityEnforcer {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl OperationGate for CapabilityEnforcer {
    async fn authorize(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        operation: Operation,
    ) -> Result<()> {
        if profile.contains(operation) {
            return Ok(());
        }

        tracing::warn!(
            bot = %bot_id,
            operation = %operation,
            profile = %profile,
            "Rejected operation outside capability profile"
        );
        crate::metrics::track_policy_violation(bot_id, operation);

        let entry = AuditEntry::new(bot_id, "authorize_operation", operation.as_str(), AuditOutcome::Denied)
            .with_metadata(serde_json::json!({ "profile": profile.tags() }));
        if let Err(e) = self.audit.log(entry).await {
            tracing::error!(error = %e, "Failed to write audit entry for policy violation");
        }

        Err(Error::PolicyViolation {
            bot: bot_id.to_string(),
            operation: operation.to_string(),
            profile: profile.to_string(),
        })
    }
}
