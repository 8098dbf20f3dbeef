//! Session orchestration for AgentRelay.
//!
//! This crate provides the session cache (Hot/Warm/Cold acquisition, expiry
//! sweep, shutdown drain), scoped sub-agent delegation, and the per-message
//! orchestrator that ties them to the capability policy and file registry.

pub mod delegation;
pub mod orchestrator;
pub mod session_cache;

pub use delegation::{DelegationContext, DelegationResult};
pub use orchestrator::Orchestrator;
pub use session_cache::{DrainReport, SessionCache, SessionCacheConfig, SessionLease};
