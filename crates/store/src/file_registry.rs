//! Ephemeral download tokens for files produced by agents.
//!
//! The registry owns the token and its expiry, never the file content: sweeping
//! or evicting an entry leaves the file on disk untouched.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use rand::{rngs::OsRng, RngCore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use agent_relay_core::{DownloadLink, Error, Result};
use agent_relay_governance::metrics;

const TOKEN_BYTES: usize = 32;
const FALLBACK_MIME: &str = "application/octet-stream";

/// A registered file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub token: String,
    pub absolute_path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Monotonic expiry used for all comparisons.
    pub(crate) deadline: Instant,
}

impl FileEntry {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Token -> file map with per-entry expiry.
pub struct FileRegistry {
    entries: DashMap<String, FileEntry>,
    default_ttl: Duration,
    public_base_url: String,
}

impl FileRegistry {
    pub fn new(default_ttl: Duration, public_base_url: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Register `path` and return a fresh download token.
    ///
    /// `mime_type` overrides extension-based inference; `ttl` overrides the
    /// registry default.
    pub async fn register(
        &self,
        path: impl AsRef<Path>,
        display_name: &str,
        mime_type: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::not_found(format!("file {}", path.display())))?;
        if !metadata.is_file() {
            return Err(Error::not_found(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let absolute_path = tokio::fs::canonicalize(path).await?;

        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => infer_mime(&absolute_path, display_name),
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        let token = generate_token();
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| created_at.checked_add_signed(d))
            .ok_or_else(|| Error::invalid_request(format!("ttl out of range: {:?}", ttl)))?;
        let deadline = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| Error::invalid_request(format!("ttl out of range: {:?}", ttl)))?;

        let entry = FileEntry {
            token: token.clone(),
            absolute_path,
            mime_type,
            display_name: display_name.to_string(),
            created_at,
            expires_at,
            deadline,
        };

        match self.entries.entry(token.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::internal("download token collision"));
            }
            Entry::Vacant(slot) => {
                tracing::debug!(
                    path = %entry.absolute_path.display(),
                    mime = %entry.mime_type,
                    ttl_secs = ttl.as_secs(),
                    "Registered download"
                );
                slot.insert(entry);
            }
        }
        metrics::track_file_registered();
        Ok(token)
    }

    /// Look up a live entry.
    pub fn resolve(&self, token: &str) -> Result<FileEntry> {
        match self.entries.get(token) {
            Some(entry) if !entry.is_expired() => Ok(entry.clone()),
            _ => Err(Error::not_found_or_expired("download link")),
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired downloads");
            metrics::track_files_swept(removed);
        }
        removed
    }

    pub fn evict(&self, token: &str) -> bool {
        self.entries.remove(token).is_some()
    }

    /// Public URL for `token`.
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/files/{}", self.public_base_url, token)
    }

    /// Resolve `token` into the link handed back to the user.
    pub fn link(&self, token: &str) -> Result<DownloadLink> {
        let entry = self.resolve(token)?;
        Ok(DownloadLink {
            url: self.download_url(&entry.token),
            token: entry.token,
            display_name: entry.display_name,
            mime_type: entry.mime_type,
            expires_at: entry.expires_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("File registry sweeper stopped");
        })
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn infer_mime(path: &Path, display_name: &str) -> String {
    mime_guess::from_path(path)
        .first()
        .or_else(|| mime_guess::from_path(display_name).first())
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}
