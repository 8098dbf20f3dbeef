//! Subprocess-backed agent engine.
//!
//! Every handle owns exactly one worker process. The worker speaks the JSON
//! lines protocol in [`crate::protocol`]; tool operations it wants to perform
//! are authorized through the [`OperationGate`] before they run.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use agent_relay_core::config::EngineConfig;
use agent_relay_core::{
    AgentEngine, AgentHandle, AgentReply, CapabilityProfile, Error, Operation, OperationGate,
    RequestContext, Result,
};

use crate::protocol::{HostMessage, WorkerMessage};

/// How long a worker gets to exit after `shutdown` before it is killed.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(3);

struct WorkerIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerIo {
    async fn send(&mut self, message: &HostMessage<'_>) -> Result<()> {
        let line = message.to_line()?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::engine_unavailable(format!("worker stdin closed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::engine_unavailable(format!("worker stdin closed: {}", e)))
    }

    async fn recv(&mut self) -> Result<WorkerMessage> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| Error::engine_unavailable(format!("worker stdout failed: {}", e)))?
                .ok_or_else(|| Error::engine_unavailable("worker exited"))?;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map_err(|e| {
                Error::engine_unavailable(format!("malformed worker message: {}", e))
            });
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// [`AgentEngine`] that spawns one worker process per handle.
pub struct ProcessAgentEngine {
    config: EngineConfig,
    gate: Arc<dyn OperationGate>,
}

impl ProcessAgentEngine {
    pub fn new(config: EngineConfig, gate: Arc<dyn OperationGate>) -> Self {
        Self { config, gate }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl AgentEngine for ProcessAgentEngine {
    async fn connect(
        &self,
        bot_id: &str,
        profile: &CapabilityProfile,
        resume_id: Option<&str>,
    ) -> Result<Box<dyn AgentHandle>> {
        let mut child = self.command().spawn().map_err(|e| {
            Error::engine_unavailable(format!(
                "failed to spawn worker '{}': {}",
                self.config.program, e
            ))
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill().await;
                return Err(Error::internal("worker stdio not captured"));
            }
        };
        let mut io = WorkerIo {
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let handshake = async {
            io.send(&HostMessage::Start {
                bot_id,
                profile,
                resume_id,
            })
            .await?;
            match io.recv().await? {
                WorkerMessage::Ready { conversation_id } => Ok(conversation_id),
                WorkerMessage::Error { message } => Err(Error::engine_unavailable(message)),
                other => Err(Error::engine_unavailable(format!(
                    "unexpected handshake message: {:?}",
                    other
                ))),
            }
        };

        let conversation_id =
            match tokio::time::timeout(self.config.handshake_timeout(), handshake).await {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => {
                    let _ = child.kill().await;
                    return Err(e);
                }
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(Error::engine_unavailable(format!(
                        "worker handshake timed out after {:?}",
                        self.config.handshake_timeout()
                    )));
                }
            };

        tracing::info!(
            bot = %bot_id,
            pid = ?child.id(),
            resumed = resume_id.is_some(),
            conversation_id = ?conversation_id,
            "Agent worker connected"
        );

        Ok(Box::new(ProcessAgentHandle {
            bot_id: bot_id.to_string(),
            conversation_id,
            gate: self.gate.clone(),
            invoke_timeout: self.config.invoke_timeout(),
            connected: AtomicBool::new(true),
            io: tokio::sync::Mutex::new(Some(io)),
            child: std::sync::Mutex::new(Some(child)),
        }))
    }
}

// =============================================================================
// Handle
// =============================================================================

/// One live worker process.
pub struct ProcessAgentHandle {
    bot_id: String,
    conversation_id: Option<String>,
    gate: Arc<dyn OperationGate>,
    invoke_timeout: Duration,
    connected: AtomicBool,
    io: tokio::sync::Mutex<Option<WorkerIo>>,
    child: std::sync::Mutex<Option<Child>>,
}

impl ProcessAgentHandle {
    fn take_child(&self) -> Option<Child> {
        self.child.lock().ok().and_then(|mut c| c.take())
    }

    async fn run_turn(&self, io: &mut WorkerIo, request: &RequestContext) -> Result<AgentReply> {
        io.send(&HostMessage::Query(request)).await?;
        loop {
            match io.recv().await? {
                WorkerMessage::Reply(reply) => return Ok(reply),
                WorkerMessage::Authorize { id, operation } => {
                    let decision = match operation.parse::<Operation>() {
                        Ok(op) => {
                            self.gate
                                .authorize(&self.bot_id, &request.profile, op)
                                .await
                        }
                        Err(_) => {
                            tracing::warn!(
                                bot = %self.bot_id,
                                operation = %operation,
                                "Worker requested an unknown operation"
                            );
                            Err(Error::PolicyViolation {
                                bot: self.bot_id.clone(),
                                operation,
                                profile: request.profile.to_string(),
                            })
                        }
                    };
                    let answer = match decision {
                        Ok(()) => HostMessage::Authorization {
                            id,
                            allowed: true,
                            reason: None,
                        },
                        Err(e) => HostMessage::Authorization {
                            id,
                            allowed: false,
                            reason: Some(e.to_string()),
                        },
                    };
                    io.send(&answer).await?;
                }
                WorkerMessage::Error { message } => {
                    return Err(Error::internal(format!("worker error: {}", message)))
                }
                WorkerMessage::Ready { .. } => {
                    return Err(Error::engine_unavailable("worker restarted mid-turn"))
                }
            }
        }
    }
}

#[async_trait]
impl AgentHandle for ProcessAgentHandle {
    fn conversation_id(&self) -> Option<String> {
        self.conversation_id.clone()
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut child) = self.child.lock() else {
            return false;
        };
        match child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            _ => {
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    async fn invoke(&self, request: &RequestContext) -> Result<AgentReply> {
        let mut guard = self.io.lock().await;
        let io = guard
            .as_mut()
            .ok_or_else(|| Error::engine_unavailable("worker disconnected"))?;

        match tokio::time::timeout(self.invoke_timeout, self.run_turn(io, request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                if matches!(e, Error::EngineUnavailable(_)) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e)
            }
            Err(_) => {
                // The protocol stream is now out of step; the worker is unusable.
                self.connected.store(false, Ordering::SeqCst);
                Err(Error::Timeout(format!(
                    "worker for '{}' did not reply within {:?}",
                    self.bot_id, self.invoke_timeout
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(mut child) = self.take_child() else {
            return Ok(());
        };

        // A turn in progress holds the io lock; skip the polite shutdown then.
        if let Ok(mut guard) = self.io.try_lock() {
            if let Some(mut io) = guard.take() {
                let _ = io.send(&HostMessage::Shutdown).await;
            }
        }

        match tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(bot = %self.bot_id, %status, "Agent worker exited");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::disconnect_failed(format!(
                "waiting for worker of '{}': {}",
                self.bot_id, e
            ))),
            Err(_) => {
                tracing::warn!(bot = %self.bot_id, "Agent worker ignored shutdown, killing");
                child.kill().await.map_err(|e| {
                    Error::disconnect_failed(format!("killing worker of '{}': {}", self.bot_id, e))
                })
            }
        }
    }
}
