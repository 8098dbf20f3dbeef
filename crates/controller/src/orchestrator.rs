//! Per-message orchestration.
//!
//! One inbound message becomes: acquire a session, invoke the agent with its
//! directive and profile, run any delegated sub-tasks, register produced
//! files, and release the session.

use std::sync::Arc;
use std::time::Duration;

use agent_relay_core::{
    AgentEngine, AgentReply, ArtifactRef, DownloadLink, Error, InboundMessage, Operation,
    OperationGate, OrchestratedReply, RequestContext, Result, SessionKey,
};
use agent_relay_governance::CapabilityPolicy;
use agent_relay_store::FileRegistry;

use crate::delegation::{follow_up_message, DelegationContext, DelegationResult};
use crate::session_cache::{SessionCache, SessionLease};

/// Drives one inbound message through the session cache and the agent.
pub struct Orchestrator {
    sessions: SessionCache,
    engine: Arc<dyn AgentEngine>,
    policy: Arc<CapabilityPolicy>,
    files: Arc<FileRegistry>,
    gate: Arc<dyn OperationGate>,
    retry_backoff: Duration,
}

impl Orchestrator {
    pub fn new(
        sessions: SessionCache,
        engine: Arc<dyn AgentEngine>,
        policy: Arc<CapabilityPolicy>,
        files: Arc<FileRegistry>,
        gate: Arc<dyn OperationGate>,
    ) -> Self {
        Self {
            sessions,
            engine,
            policy,
            files,
            gate,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Wait this long before retrying after an engine failure.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Handle one inbound message.
    #[tracing::instrument(skip_all, fields(trace_id = %message.trace_id, key = %message.session_key()))]
    pub async fn handle(&self, message: InboundMessage) -> Result<OrchestratedReply> {
        let key = message.session_key();

        let (lease, reply) = match self.turn(&key, &message).await {
            Err(e) if e.is_engine_failure() => {
                tracing::warn!(error = %e, backoff = ?self.retry_backoff, "Agent engine failed, retrying with a fresh session");
                self.sessions.invalidate(&key).await;
                tokio::time::sleep(self.retry_backoff).await;
                self.turn(&key, &message).await?
            }
            other => other?,
        };

        let reply = if reply.delegations.is_empty() {
            reply
        } else {
            self.run_delegations(&lease, &message, reply).await?
        };

        let downloads = self.register_artifacts(&reply.artifacts).await;
        tracing::info!(
            strategy = lease.strategy().as_str(),
            query_count = lease.query_count(),
            downloads = downloads.len(),
            "Message handled"
        );

        Ok(OrchestratedReply {
            trace_id: message.trace_id,
            text: reply.text,
            downloads,
            strategy: lease.strategy(),
            query_count: lease.query_count(),
        })
    }

    async fn turn(
        &self,
        key: &SessionKey,
        message: &InboundMessage,
    ) -> Result<(SessionLease, AgentReply)> {
        let lease = self.sessions.acquire(key).await?;
        let request = RequestContext {
            trace_id: message.trace_id.clone(),
            key: key.clone(),
            message: message.text.clone(),
            sender: message.sender.clone(),
            directive: self.policy.directive(key.bot_id(), lease.profile()),
            profile: lease.profile().clone(),
        };
        let reply = lease.invoke(&request).await?;
        Ok((lease, reply))
    }

    /// Run the delegations the parent asked for, then feed the results back
    /// to the parent in one follow-up turn.
    async fn run_delegations(
        &self,
        lease: &SessionLease,
        message: &InboundMessage,
        reply: AgentReply,
    ) -> Result<AgentReply> {
        let bot_id = lease.key().bot_id();
        if !lease.profile().contains(Operation::Delegate) {
            // Denied, logged and audited by the gate; the turn itself stands.
            let _ = self
                .gate
                .authorize(bot_id, lease.profile(), Operation::Delegate)
                .await;
            return Ok(AgentReply {
                delegations: Vec::new(),
                ..reply
            });
        }

        let mut results = Vec::with_capacity(reply.delegations.len());
        for objective in &reply.delegations {
            match DelegationContext::spawn(bot_id, lease.profile(), 0, objective.as_str()) {
                Ok(ctx) => results.push(self.run_child(ctx, message).await),
                Err(e) => tracing::warn!(error = %e, "Delegation refused"),
            }
        }

        let follow_up = RequestContext {
            trace_id: message.trace_id.clone(),
            key: lease.key().clone(),
            message: follow_up_message(&results),
            sender: None,
            directive: self.policy.directive(bot_id, lease.profile()),
            profile: lease.profile().clone(),
        };
        let mut final_reply = lease.invoke(&follow_up).await?;
        if !final_reply.delegations.is_empty() {
            tracing::debug!(
                count = final_reply.delegations.len(),
                "Ignoring delegations requested in follow-up turn"
            );
            final_reply.delegations.clear();
        }

        let mut artifacts = reply.artifacts;
        for r in results {
            artifacts.extend(r.artifacts);
        }
        artifacts.append(&mut final_reply.artifacts);
        final_reply.artifacts = artifacts;
        Ok(final_reply)
    }

    /// One scoped child session: connect, invoke once, always disconnect.
    ///
    /// Runs in its own task so the child is released even if the caller is
    /// cancelled.
    async fn run_child(&self, ctx: DelegationContext, message: &InboundMessage) -> DelegationResult {
        let engine = self.engine.clone();
        let gate = self.gate.clone();
        let request = RequestContext {
            trace_id: message.trace_id.clone(),
            key: message.session_key(),
            message: ctx.objective.clone(),
            sender: None,
            directive: ctx.directive(&self.policy),
            profile: ctx.profile.clone(),
        };
        let delegation_id = ctx.id.clone();
        tracing::info!(delegation = %ctx.id, objective = %ctx.objective, profile = %ctx.profile, "Starting delegated sub-task");

        let task = tokio::spawn(async move {
            let handle = match engine.connect(&ctx.parent_bot, &ctx.profile, None).await {
                Ok(handle) => handle,
                Err(e) => return DelegationResult::failure(&ctx, e.to_string()),
            };
            let outcome = handle.invoke(&request).await;
            if let Err(e) = handle.disconnect().await {
                tracing::warn!(delegation = %ctx.id, error = %e, "Child session disconnect failed");
            }

            match outcome {
                Ok(reply) => {
                    if !reply.delegations.is_empty() {
                        // Children never hold `delegate`; this records the violation.
                        let _ = gate
                            .authorize(&ctx.parent_bot, &ctx.profile, Operation::Delegate)
                            .await;
                    }
                    DelegationResult::success(&ctx, reply)
                }
                Err(e) => DelegationResult::failure(&ctx, e.to_string()),
            }
        });

        match task.await {
            Ok(result) => {
                if let Some(err) = &result.error {
                    tracing::warn!(delegation = %delegation_id, error = %err, "Delegated sub-task failed");
                }
                result
            }
            Err(e) => DelegationResult {
                delegation_id,
                objective: String::new(),
                success: false,
                result: String::new(),
                artifacts: Vec::new(),
                error: Some(Error::internal(e.to_string()).to_string()),
            },
        }
    }

    async fn register_artifacts(&self, artifacts: &[ArtifactRef]) -> Vec<DownloadLink> {
        let mut links = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let registered = self
                .files
                .register(
                    &artifact.path,
                    &artifact.display_name,
                    artifact.mime_type.as_deref(),
                    None,
                )
                .await
                .and_then(|token| self.files.link(&token));
            match registered {
                Ok(link) => links.push(link),
                Err(e) => tracing::warn!(
                    path = %artifact.path.display(),
                    error = %e,
                    "Could not register artifact, skipping"
                ),
            }
        }
        links
    }
}
