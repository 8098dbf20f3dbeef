//! Core traits for AgentRelay.
//!
//! Traits are organized by collaborator:
//! - `engine`: the opaque agent engine (AgentEngine, AgentHandle)
//! - `store`: durable conversation ids (ConversationStore)
//! - `governance`: operation authorization (OperationGate)

pub mod engine;
pub mod governance;
pub mod store;

pub use engine::*;
pub use governance::*;
pub use store::*;
