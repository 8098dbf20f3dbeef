//! Mock implementations of core traits for testing.
//!
//! `MockAgentEngine` stands in for the external agent engine. It records every
//! connect and disconnect so tests can assert single-flight and
//! disconnect-exactly-once behaviour, and supports injected latency and
//! failures.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    traits::{AgentEngine, AgentHandle, OperationGate},
    types::{AgentReply, CapabilityProfile, Operation, RequestContext},
    Error, Result,
};

// =============================================================================
// Mock Agent Engine
// =============================================================================

/// A recorded `connect` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectCall {
    pub handle_id: u64,
    pub bot_id: String,
    pub profile: CapabilityProfile,
    pub resume_id: Option<String>,
}

#[derive(Default)]
struct EngineState {
    connect_calls: Vec<ConnectCall>,
    disconnects: HashMap<u64, usize>,
    scripted_replies: VecDeque<AgentReply>,
    invoked: Vec<RequestContext>,
}

#[derive(Default)]
struct Knobs {
    connect_delay: Duration,
    disconnect_delays: HashMap<String, Duration>,
    failing_connects: usize,
    reject_resume: bool,
    failing_invokes: usize,
    failing_disconnects: bool,
}

/// Scripted agent engine.
#[derive(Clone, Default)]
pub struct MockAgentEngine {
    state: Arc<Mutex<EngineState>>,
    knobs: Arc<Mutex<Knobs>>,
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
}

impl MockAgentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect sleeps this long before completing.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.knobs.lock().unwrap().connect_delay = delay;
        self
    }

    /// Disconnecting handles of `bot_id` takes `delay`.
    pub fn with_disconnect_delay(self, bot_id: &str, delay: Duration) -> Self {
        self.knobs
            .lock()
            .unwrap()
            .disconnect_delays
            .insert(bot_id.to_string(), delay);
        self
    }

    /// The next `n` connects fail with `EngineUnavailable`.
    pub fn fail_next_connects(&self, n: usize) {
        self.knobs.lock().unwrap().failing_connects = n;
    }

    /// Connects that carry a resume id are rejected.
    pub fn reject_resume(&self, reject: bool) {
        self.knobs.lock().unwrap().reject_resume = reject;
    }

    /// The next `n` invokes fail with `EngineUnavailable`.
    pub fn fail_next_invokes(&self, n: usize) {
        self.knobs.lock().unwrap().failing_invokes = n;
    }

    /// Every disconnect returns an error (after releasing the handle).
    pub fn fail_disconnects(&self, fail: bool) {
        self.knobs.lock().unwrap().failing_disconnects = fail;
    }

    /// Queue a reply; queued replies are served before the echo default.
    pub fn push_reply(&self, reply: AgentReply) {
        self.state.lock().unwrap().scripted_replies.push_back(reply);
    }

    pub fn connect_calls(&self) -> Vec<ConnectCall> {
        self.state.lock().unwrap().connect_calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_calls.len()
    }

    /// How many times the handle with `handle_id` was disconnected.
    pub fn disconnect_count(&self, handle_id: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .disconnects
            .get(&handle_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects.values().sum()
    }

    /// Handles connected and not yet disconnected.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Requests seen by `invoke`, in order.
    pub fn invoked(&self) -> Vec<RequestContext> {
        self.state.lock().unwrap().invoked.clone()
    }
}

#[async_trait]
impl AgentEngine for MockAgentEngine {
    async fn connect(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        resume_id: Option<&str>,
    ) -> Result<Box<dyn AgentHandle>> {
        let (delay, disconnect_delay) = {
            let knobs = self.knobs.lock().unwrap();
            (
                knobs.connect_delay,
                knobs.disconnect_delays.get(bot_id).copied().unwrap_or_default(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut knobs = self.knobs.lock().unwrap();
            if knobs.failing_connects > 0 {
                knobs.failing_connects -= 1;
                return Err(Error::engine_unavailable("mock connect failure"));
            }
            if resume_id.is_some() && knobs.reject_resume {
                return Err(Error::engine_unavailable("mock engine rejected resume id"));
            }
        }

        let handle_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().unwrap().connect_calls.push(ConnectCall {
            handle_id,
            bot_id: bot_id.to_string(),
            profile: profile.clone(),
            resume_id: resume_id.map(str::to_string),
        });
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockAgentHandle {
            id: handle_id,
            bot_id: bot_id.to_string(),
            conversation_id: resume_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("conv-{}", handle_id)),
            connected: AtomicBool::new(true),
            disconnect_delay,
            engine: self.clone(),
        }))
    }
}

/// Handle produced by [`MockAgentEngine`].
pub struct MockAgentHandle {
    id: u64,
    bot_id: String,
    conversation_id: String,
    connected: AtomicBool,
    disconnect_delay: Duration,
    engine: MockAgentEngine,
}

impl MockAgentHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Simulate the backing worker dying.
    pub fn kill(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentHandle for MockAgentHandle {
    fn conversation_id(&self) -> Option<String> {
        Some(self.conversation_id.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn invoke(&self, request: &RequestContext) -> Result<AgentReply> {
        {
            let mut knobs = self.engine.knobs.lock().unwrap();
            if knobs.failing_invokes > 0 {
                knobs.failing_invokes -= 1;
                self.connected.store(false, Ordering::SeqCst);
                return Err(Error::engine_unavailable("mock invoke failure"));
            }
        }
        let mut state = self.engine.state.lock().unwrap();
        state.invoked.push(request.clone());
        Ok(state
            .scripted_replies
            .pop_front()
            .unwrap_or_else(|| AgentReply::text(format!("{}: {}", self.bot_id, request.message))))
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.disconnect_delay.is_zero() {
            tokio::time::sleep(self.disconnect_delay).await;
        }
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            self.engine.live.fetch_sub(1, Ordering::SeqCst);
        }
        *self
            .engine
            .state
            .lock()
            .unwrap()
            .disconnects
            .entry(self.id)
            .or_insert(0) += 1;

        if self.engine.knobs.lock().unwrap().failing_disconnects {
            return Err(Error::disconnect_failed(format!("mock handle {}", self.id)));
        }
        Ok(())
    }
}

// =============================================================================
// Mock Operation Gate
// =============================================================================

/// Gate that checks profile membership and remembers every decision.
#[derive(Default)]
pub struct RecordingGate {
    decisions: Mutex<Vec<(String, Operation, bool)>>,
}

impl RecordingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<(String, Operation, bool)> {
        self.decisions.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationGate for RecordingGate {
    async fn authorize(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        operation: Operation,
    ) -> Result<()> {
        let allowed = profile.contains(operation);
        self.decisions
            .lock()
            .unwrap()
            .push((bot_id.to_string(), operation, allowed));
        if allowed {
            Ok(())
        } else {
            Err(Error::PolicyViolation {
                bot: bot_id.to_string(),
                operation: operation.to_string(),
                profile: profile.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_engine_tracks_lifecycle() {
        let engine = MockAgentEngine::new();
        let handle = engine
            .connect("helper", &CapabilityProfile::empty(), None)
            .await
            .unwrap();

        assert_eq!(handle.conversation_id().as_deref(), Some("conv-1"));
        assert_eq!(engine.live_handles(), 1);

        handle.disconnect().await.unwrap();
        handle.disconnect().await.unwrap();
        assert!(!handle.is_connected());
        assert_eq!(engine.live_handles(), 0);
        assert_eq!(engine.disconnect_count(1), 2);
    }

    #[tokio::test]
    async fn test_mock_engine_failure_injection() {
        let engine = MockAgentEngine::new();
        engine.fail_next_connects(1);
        assert!(engine
            .connect("helper", &CapabilityProfile::empty(), None)
            .await
            .is_err());
        assert!(engine
            .connect("helper", &CapabilityProfile::empty(), None)
            .await
            .is_ok());

        engine.reject_resume(true);
        assert!(engine
            .connect("helper", &CapabilityProfile::empty(), Some("conv-old"))
            .await
            .is_err());
        assert_eq!(engine.connect_count(), 1);
    }
}
