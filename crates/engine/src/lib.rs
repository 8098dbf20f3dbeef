//! Agent engine for AgentRelay.
//!
//! Runs each agent session in its own worker process and relays turns to it
//! over a line-delimited JSON protocol.
//!
//! # Protocol
//!
//! ```text
//! host -> worker   {"type":"start","bot_id":..,"profile":[..],"resume_id":..}
//! worker -> host   {"type":"ready","conversation_id":..}
//! host -> worker   {"type":"query",..request context..}
//! worker -> host   {"type":"authorize","id":1,"operation":"read-file"}   (zero or more)
//! host -> worker   {"type":"authorization","id":1,"allowed":true}
//! worker -> host   {"type":"reply","text":..,"artifacts":[..],"delegations":[..]}
//! host -> worker   {"type":"shutdown"}
//! ```

pub mod process;
pub mod protocol;

pub use process::{ProcessAgentEngine, ProcessAgentHandle};
