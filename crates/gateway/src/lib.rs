#![deny(unused)]
//! HTTP gateway for AgentRelay.
//!
//! Exposes the chat entry point, the short-lived file download route and a
//! read-only session listing.

pub mod server;

pub use server::{ApiError, ChatRequest, GatewayConfig, GatewayServer};
