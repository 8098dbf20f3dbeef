//! Core type definitions for AgentRelay.
//!
//! Broken down into submodules by concern.

pub mod capability;
pub mod request;
pub mod session;

pub use capability::*;
pub use request::*;
pub use session::*;
