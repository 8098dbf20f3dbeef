//! Audit logging for policy decisions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use agent_relay_core::{Error, Result};

/// Outcome of an audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Denied,
    Error(String),
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: String,
    /// Timestamp (RFC 3339).
    pub timestamp: String,
    /// Bot identity (or operator) that triggered the action.
    pub actor: String,
    /// Action performed (e.g., "authorize_operation", "policy_load").
    pub action: String,
    /// Resource affected (e.g., operation tag).
    pub resource: String,
    /// Outcome of the action.
    pub outcome: AuditOutcome,
    /// Optional metadata (JSON).
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            outcome,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filter for querying audit logs.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, e: &AuditEntry) -> bool {
        self.actor.as_ref().map_or(true, |a| &e.actor == a)
            && self.action.as_ref().map_or(true, |a| &e.action == a)
            && self.resource.as_ref().map_or(true, |r| &e.resource == r)
    }
}

/// Trait for audit log persistence.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Log an audit entry.
    async fn log(&self, entry: AuditEntry) -> Result<()>;

    /// Query audit logs with optional filters.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;
}

/// In-memory audit store for testing.
pub struct InMemoryAuditStore {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("audit store lock poisoned"))?
            .push(entry);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::internal("audit store lock poisoned"))?;
        let mut result: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }
}

/// Append-only JSON-lines audit log.
pub struct FileAuditStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!("Failed to create audit directory: {}", e))
            })?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::storage(format!("Failed to open audit log: {}", e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::storage(format!("Failed to write audit log: {}", e)))?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(format!("Failed to read audit log: {}", e))),
        };

        let mut result = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) if filter.matches(&entry) => result.push(entry),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping malformed audit line"),
            }
            if filter.limit.is_some_and(|limit| result.len() >= limit) {
                break;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_filter_and_limit() {
        let store = InMemoryAuditStore::new();
        for actor in ["helper", "helper", "ops"] {
            store
                .log(AuditEntry::new(actor, "authorize_operation", "write-file", AuditOutcome::Denied))
                .await
                .unwrap();
        }

        let helper = store
            .query(AuditFilter {
                actor: Some("helper".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(helper.len(), 2);

        let limited = store
            .query(AuditFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuditStore::new(dir.path().join("logs/audit.jsonl"));

        assert!(store.query(AuditFilter::default()).await.unwrap().is_empty());

        store
            .log(
                AuditEntry::new("helper", "authorize_operation", "execute-shell", AuditOutcome::Denied)
                    .with_metadata(serde_json::json!({"profile": ["read-file"]})),
            )
            .await
            .unwrap();
        store
            .log(AuditEntry::new("ops", "policy_load", "capability_profile", AuditOutcome::Success))
            .await
            .unwrap();

        let all = store.query(AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].outcome, AuditOutcome::Denied);

        let shell = store
            .query(AuditFilter {
                resource: Some("execute-shell".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(shell.len(), 1);
        assert_eq!(shell[0].actor, "helper");
    }
}
