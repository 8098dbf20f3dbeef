//! Capability policy: which operations each bot identity may invoke.
//!
//! The table is loaded once at startup and never mutated. Every computed
//! profile is intersected with [`SAFE_OPERATIONS`], so privileged tags in the
//! raw configuration never reach an agent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use agent_relay_core::{CapabilityProfile, Error, Operation};

use crate::audit::{AuditEntry, AuditOutcome, AuditStore};

/// Upper bound on any profile computed for chat-triggered invocation.
pub const SAFE_OPERATIONS: [Operation; 5] = [
    Operation::ReadNetwork,
    Operation::ReadFile,
    Operation::SearchFile,
    Operation::EnumerateFile,
    Operation::Delegate,
];

/// Children may not delegate again.
pub const MAX_DELEGATION_DEPTH: u8 = 1;

/// The safe superset as a profile.
pub fn safe_superset() -> CapabilityProfile {
    SAFE_OPERATIONS.into_iter().collect()
}

/// Intersect raw tags with the safe superset.
///
/// Returns the resulting profile and the tags that were dropped.
pub fn apply_floor(raw: &[Operation]) -> (CapabilityProfile, Vec<Operation>) {
    let safe = safe_superset();
    let mut dropped: Vec<Operation> = raw.iter().copied().filter(|op| !safe.contains(*op)).collect();
    dropped.sort();
    dropped.dedup();
    let profile = raw.iter().copied().filter(|op| safe.contains(*op)).collect();
    (profile, dropped)
}

/// Profile handed to a delegated child: no `delegate`, nothing privileged,
/// never more than the parent had.
pub fn child_profile(parent: &CapabilityProfile) -> CapabilityProfile {
    parent
        .without(Operation::Delegate)
        .intersection(&safe_superset())
}

// =============================================================================
// Policy File
// =============================================================================

/// A versioned capability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default = "default_version")]
    pub version: String,
    pub bots: Vec<BotEntry>,
}

fn default_version() -> String {
    "1".to_string()
}

/// Raw configuration for one bot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEntry {
    pub id: String,
    /// Persona text placed ahead of the capability directive.
    #[serde(default)]
    pub persona: Option<String>,
    /// Declared operation tags, before the safety floor is applied.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Computed policy for one bot.
#[derive(Debug, Clone)]
pub struct BotPolicy {
    pub profile: CapabilityProfile,
    pub persona: Option<String>,
    /// Privileged tags removed from the raw configuration.
    pub dropped: Vec<Operation>,
}

// =============================================================================
// Capability Policy
// =============================================================================

/// Immutable `bot identity -> CapabilityProfile` table.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    version: String,
    bots: HashMap<String, BotPolicy>,
}

impl CapabilityPolicy {
    /// Load the table from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read policy file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse the table from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: PolicyFile =
            serde_yaml::from_str(content).with_context(|| "Failed to parse policy YAML")?;
        Self::from_file(file)
    }

    /// Build the table from an already parsed policy file.
    pub fn from_file(file: PolicyFile) -> Result<Self> {
        let mut bots = HashMap::with_capacity(file.bots.len());
        for entry in file.bots {
            let (profile, dropped) = apply_floor(&entry.operations);
            if !dropped.is_empty() {
                tracing::warn!(
                    bot = %entry.id,
                    dropped = ?dropped,
                    "Dropping privileged operations from bot configuration"
                );
            }
            let policy = BotPolicy {
                profile,
                persona: entry.persona,
                dropped,
            };
            if bots.insert(entry.id.clone(), policy).is_some() {
                anyhow::bail!("Duplicate bot id in policy: {}", entry.id);
            }
        }
        tracing::info!(version = %file.version, bots = bots.len(), "Capability policy loaded");
        Ok(Self {
            version: file.version,
            bots,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Configured bot identities, sorted.
    pub fn bot_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.bots.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Operations a top-level agent for `bot_id` may invoke.
    pub fn allowed_operations(&self, bot_id: &str) -> agent_relay_core::Result<CapabilityProfile> {
        self.bots
            .get(bot_id)
            .map(|b| b.profile.clone())
            .ok_or_else(|| Error::not_found(format!("bot '{}' is not configured", bot_id)))
    }

    /// Persona configured for `bot_id`.
    pub fn persona(&self, bot_id: &str) -> Option<&str> {
        self.bots.get(bot_id).and_then(|b| b.persona.as_deref())
    }

    /// Directive for `bot_id` running with `profile`.
    pub fn directive(&self, bot_id: &str, profile: &CapabilityProfile) -> String {
        crate::directive::render(self.persona(bot_id), profile)
    }

    /// Write one audit record per bot whose configuration lost privileged tags.
    pub async fn record_drops(&self, audit: &dyn AuditStore) -> agent_relay_core::Result<usize> {
        let mut recorded = 0;
        for (bot_id, policy) in &self.bots {
            if policy.dropped.is_empty() {
                continue;
            }
            let dropped: Vec<&str> = policy.dropped.iter().map(|op| op.as_str()).collect();
            audit
                .log(
                    AuditEntry::new(bot_id, "policy_load", "capability_profile", AuditOutcome::Denied)
                        .with_metadata(serde_json::json!({
                            "dropped": dropped,
                            "profile": policy.profile.tags(),
                            "policy_version": self.version,
                        })),
                )
                .await?;
            recorded += 1;
        }
        Ok(recorded)
    }
}
