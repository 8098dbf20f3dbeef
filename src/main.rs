#![deny(unused)]
//! AgentRelay - chat-facing relay for long-lived agent sessions.
//!
//! Wires the capability policy, the process-backed agent engine, the session
//! cache and the file registry behind the HTTP gateway.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;

use agent_relay_controller::{Orchestrator, SessionCache, SessionCacheConfig};
use agent_relay_core::config::AppConfig;
use agent_relay_core::{AgentEngine, ConversationStore, OperationGate};
use agent_relay_engine::ProcessAgentEngine;
use agent_relay_gateway::{GatewayConfig, GatewayServer};
use agent_relay_governance::{
    AuditStore, CapabilityEnforcer, CapabilityPolicy, FileAuditStore, InMemoryAuditStore,
};
use agent_relay_store::{FileConversationStore, FileRegistry, InMemoryConversationStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    agent_relay_governance::configure_tracing(&config.logging)?;
    tracing::info!("Starting AgentRelay v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = agent_relay_governance::setup_metrics_recorder()?;

    // =========================================================================
    // Governance: capability policy + audit trail
    // =========================================================================
    let audit: Arc<dyn AuditStore> = match &config.policy.audit_log_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using file audit log");
            Arc::new(FileAuditStore::new(path))
        }
        None => {
            tracing::warn!("No audit log path configured, audit entries are kept in memory");
            Arc::new(InMemoryAuditStore::new())
        }
    };

    let policy = Arc::new(CapabilityPolicy::load(&config.policy.path)?);
    let dropped = policy.record_drops(audit.as_ref()).await?;
    tracing::info!(
        version = policy.version(),
        bots = policy.bot_ids().len(),
        dropped,
        "Capability policy loaded"
    );

    let gate: Arc<dyn OperationGate> = Arc::new(CapabilityEnforcer::new(audit.clone()));

    // =========================================================================
    // Sessions
    // =========================================================================
    let conversations: Arc<dyn ConversationStore> = match &config.sessions.conversation_store_path
    {
        Some(path) => {
            tracing::info!(path = %path.display(), "Persisting conversation ids to file");
            Arc::new(FileConversationStore::new(path))
        }
        None => {
            tracing::warn!("No conversation store path configured, resume ids are lost on restart");
            Arc::new(InMemoryConversationStore::new())
        }
    };

    let engine: Arc<dyn AgentEngine> =
        Arc::new(ProcessAgentEngine::new(config.engine.clone(), gate.clone()));

    let sessions = SessionCache::new(
        engine.clone(),
        policy.clone(),
        conversations,
        SessionCacheConfig::from(&config.sessions),
    );
    sessions.start();

    // =========================================================================
    // File registry
    // =========================================================================
    let files = Arc::new(FileRegistry::new(
        config.files.default_ttl(),
        config.server.public_base_url.clone(),
    ));
    let (files_shutdown_tx, files_shutdown_rx) = watch::channel(false);
    let files_sweeper = files
        .clone()
        .spawn_sweeper(config.files.sweep_interval(), files_shutdown_rx);

    // =========================================================================
    // Gateway
    // =========================================================================
    let orchestrator = Arc::new(
        Orchestrator::new(sessions.clone(), engine, policy, files.clone(), gate)
            .with_retry_backoff(config.orchestrator.retry_backoff()),
    );

    let server = GatewayServer::new(GatewayConfig::from(&config.server), orchestrator, files)
        .with_metrics(metrics_handle);

    server.run_with_shutdown(shutdown_signal()).await?;

    // =========================================================================
    // Drain
    // =========================================================================
    let report = sessions.shutdown(config.sessions.shutdown_grace()).await;
    tracing::info!(
        closed = report.closed,
        abandoned = report.abandoned.len(),
        "Session cache drained"
    );

    let _ = files_shutdown_tx.send(true);
    if let Err(e) = files_sweeper.await {
        tracing::warn!(error = %e, "File registry sweeper did not stop cleanly");
    }

    tracing::info!("AgentRelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining");
}
