#![deny(unused)]
//! Core types, traits, and error definitions for AgentRelay.
//!
//! This crate provides the building blocks shared by the session cache, the
//! capability policy, the file registry and the HTTP gateway.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
