//! Storage for AgentRelay.
//!
//! - [`FileRegistry`]: short-lived download tokens for agent artifacts.
//! - [`ConversationStore`](agent_relay_core::ConversationStore) implementations
//!   holding the conversation ids used to resume sessions.

pub mod conversation;
pub mod file_registry;

pub use conversation::{FileConversationStore, InMemoryConversationStore};
pub use file_registry::{FileEntry, FileRegistry};
