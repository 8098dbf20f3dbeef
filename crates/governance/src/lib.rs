//! Governance for AgentRelay.
//!
//! This crate provides:
//! - The capability policy and its safety floor
//! - Behavioral directives for agent instances
//! - Structural enforcement of capability profiles
//! - Audit logging
//! - Metrics and distributed tracing

pub mod audit;
pub mod directive;
pub mod enforcer;
pub mod metrics;
pub mod policy;
pub mod tracing_layer;

pub use audit::{AuditEntry, AuditFilter, AuditOutcome, AuditStore, FileAuditStore, InMemoryAuditStore};
pub use enforcer::CapabilityEnforcer;
pub use metrics::setup_metrics_recorder;
pub use policy::{
    apply_floor, child_profile, safe_superset, BotEntry, BotPolicy, CapabilityPolicy, PolicyFile,
    MAX_DELEGATION_DEPTH, SAFE_OPERATIONS,
};
pub use tracing_layer::configure_tracing;
