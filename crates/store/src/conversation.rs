//! Durable `SessionKey -> conversation id` mapping used for Warm resumes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use agent_relay_core::{ConversationStore, Error, Result, SessionKey};

/// Conversation ids persisted as a JSON object in a single file.
pub struct FileConversationStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileConversationStore {
    /// Create a new file-based conversation store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to read conversation file: {}",
                    e
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::storage(format!("Failed to parse conversation file: {}", e)))
    }

    async fn write_all(&self, ids: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(ids)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!("Failed to create conversation directory: {}", e))
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::storage(format!("Failed to write conversation file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::storage(format!("Failed to replace conversation file: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(&key.to_string()))
    }

    async fn save(&self, key: &SessionKey, conversation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut ids = self.read_all().await?;
        ids.insert(key.to_string(), conversation_id.to_string());
        self.write_all(&ids).await
    }

    async fn remove(&self, key: &SessionKey) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut ids = self.read_all().await?;
        if ids.remove(&key.to_string()).is_none() {
            return Ok(false);
        }
        self.write_all(&ids).await?;
        Ok(true)
    }
}

/// Process-local conversation store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    ids: DashMap<SessionKey, String>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<String>> {
        Ok(self.ids.get(key).map(|r| r.value().clone()))
    }

    async fn save(&self, key: &SessionKey, conversation_id: &str) -> Result<()> {
        self.ids.insert(key.clone(), conversation_id.to_string());
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.ids.remove(key).is_some())
    }
}
