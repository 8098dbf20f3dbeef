//! Governance traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CapabilityProfile, Operation};

/// Gate consulted before an agent's operation reaches the engine's tools.
///
/// Returns `Error::PolicyViolation` for operations outside `profile`.
#[async_trait]
pub trait OperationGate: Send + Sync {
    async fn authorize(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        operation: Operation,
    ) -> Result<()>;
}
