//! Session cache: at most one live agent handle per `(scope, bot)` key.
//!
//! Acquisition tries, in order:
//! - **Hot**: reuse the live handle if it is connected and idle less than the TTL.
//! - **Warm**: connect with the conversation id persisted for the key.
//! - **Cold**: connect from scratch.
//!
//! Each key has its own async mutex (the slot). The map shard lock is only
//! held to look up or insert a slot, so a slow handshake for one key never
//! blocks another key. Every path that ends a session (sweep, invalidate,
//! shutdown, stale-on-acquire) goes through [`SessionEntry::close`], which
//! disconnects exactly once.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use agent_relay_core::config::SessionConfig;
use agent_relay_core::{
    AcquireStrategy, AgentEngine, AgentHandle, AgentReply, CapabilityProfile, CloseReason,
    ConversationStore, Error, RequestContext, Result, SessionKey, SessionSnapshot,
};
use agent_relay_governance::{metrics, CapabilityPolicy};

/// Tunables for [`SessionCache`].
#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    /// Idle time after which a handle is no longer reused.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// How long the sweeper and `invalidate` wait for one disconnect.
    pub disconnect_timeout: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SessionConfig> for SessionCacheConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            disconnect_timeout: config.disconnect_timeout(),
        }
    }
}

/// Result of [`SessionCache::shutdown`].
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Sessions disconnected within the grace period.
    pub closed: usize,
    /// Sessions whose disconnect was still running at the deadline.
    pub abandoned: Vec<SessionKey>,
}

// =============================================================================
// Session Entry
// =============================================================================

/// State of one cached session.
pub struct SessionEntry {
    key: SessionKey,
    handle: Arc<dyn AgentHandle>,
    profile: CapabilityProfile,
    conversation_id: Option<String>,
    created_at: Instant,
    /// Nanoseconds after `created_at` of the last activity.
    last_activity: AtomicU64,
    query_count: AtomicU64,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl SessionEntry {
    fn new(
        key: SessionKey,
        handle: Arc<dyn AgentHandle>,
        profile: CapabilityProfile,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            key,
            handle,
            profile,
            conversation_id,
            created_at: Instant::now(),
            last_activity: AtomicU64::new(0),
            query_count: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        let offset = self.created_at.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.last_activity.fetch_max(offset, Ordering::SeqCst);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_nanos(self.last_activity.load(Ordering::SeqCst));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// A leased entry is in use, so it counts as active whatever its idle time.
    fn is_reusable(&self, ttl: Duration) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.handle.is_connected()
            && (self.in_flight.load(Ordering::SeqCst) > 0 || self.idle() < ttl)
    }

    fn is_sweepable(&self, ttl: Duration) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
            && (self.idle() >= ttl || !self.handle.is_connected())
    }

    /// Disconnect the handle. Only the first call does anything; returns
    /// whether this call performed the disconnect.
    async fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.handle.disconnect().await {
            Ok(()) => tracing::info!(
                key = %self.key,
                reason = reason.as_str(),
                queries = self.query_count.load(Ordering::SeqCst),
                "Session closed"
            ),
            Err(e) => {
                let e = match e {
                    Error::DisconnectFailed(_) => e,
                    other => Error::disconnect_failed(other.to_string()),
                };
                tracing::warn!(key = %self.key, reason = reason.as_str(), error = %e, "Session disconnect failed, dropping entry");
                metrics::track_disconnect_failure(self.key.bot_id());
            }
        }
        metrics::track_session_closed(reason);
        true
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            conversation_id: self.conversation_id.clone(),
            query_count: self.query_count.load(Ordering::SeqCst),
            idle_secs: self.idle().as_secs(),
            age_secs: self.created_at.elapsed().as_secs(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }
}

// =============================================================================
// Session Lease
// =============================================================================

/// Scoped use of a cached session.
///
/// While a lease is alive the sweeper leaves its entry alone. Dropping it
/// refreshes the activity time and releases the entry.
pub struct SessionLease {
    entry: Arc<SessionEntry>,
    strategy: AcquireStrategy,
    query_count: u64,
}

impl SessionLease {
    fn new(entry: Arc<SessionEntry>, strategy: AcquireStrategy) -> Self {
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        let query_count = entry.query_count.load(Ordering::SeqCst);
        Self {
            entry,
            strategy,
            query_count,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.entry.key
    }

    pub fn handle(&self) -> &Arc<dyn AgentHandle> {
        &self.entry.handle
    }

    pub fn strategy(&self) -> AcquireStrategy {
        self.strategy
    }

    /// Query count of the session including this acquisition.
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.entry.conversation_id.as_deref()
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.entry.profile
    }

    pub async fn invoke(&self, request: &RequestContext) -> Result<AgentReply> {
        let reply = self.entry.handle.invoke(request).await;
        self.entry.touch();
        reply
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Session Cache
// =============================================================================

#[derive(Default)]
struct SlotState {
    entry: Option<Arc<SessionEntry>>,
    /// Set under the lock when the slot leaves the map.
    retired: bool,
}

type Slot = Arc<Mutex<SlotState>>;

struct CacheInner {
    engine: Arc<dyn AgentEngine>,
    policy: Arc<CapabilityPolicy>,
    conversations: Arc<dyn ConversationStore>,
    config: SessionCacheConfig,
    slots: DashMap<SessionKey, Slot>,
    live: AtomicUsize,
    closing: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Keyed cache of live agent sessions.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

impl SessionCache {
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        policy: Arc<CapabilityPolicy>,
        conversations: Arc<dyn ConversationStore>,
        config: SessionCacheConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(CacheInner {
                engine,
                policy,
                conversations,
                config,
                slots: DashMap::new(),
                live: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
                shutdown_tx,
                sweeper: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionCacheConfig {
        &self.inner.config
    }

    /// Spawn the background expiry sweeper. Calling it again is a no-op.
    pub fn start(&self) {
        let Ok(mut sweeper) = self.inner.sweeper.lock() else {
            return;
        };
        if sweeper.is_some() || self.inner.closing.load(Ordering::SeqCst) {
            return;
        }

        let cache = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let interval = self.inner.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Session sweeper stopped");
        }));
        tracing::info!(interval = ?interval, ttl = ?self.inner.config.ttl, "Session sweeper started");
    }

    /// Acquire the session for `key`, reusing, resuming or creating it.
    pub async fn acquire(&self, key: &SessionKey) -> Result<SessionLease> {
        let started = Instant::now();
        loop {
            if self.inner.closing.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }

            let slot: Slot = self.inner.slots.entry(key.clone()).or_default().clone();
            let mut state = slot.lock_owned().await;
            if state.retired {
                continue;
            }

            if let Some(entry) = state.entry.clone() {
                if entry.is_reusable(self.inner.config.ttl) {
                    entry.query_count.fetch_add(1, Ordering::SeqCst);
                    let lease = SessionLease::new(entry, AcquireStrategy::Hot);
                    drop(state);
                    self.record_acquire(key, &lease, started);
                    return Ok(lease);
                }

                tracing::debug!(key = %key, idle = ?entry.idle(), "Closing stale session before reconnect");
                state.entry = None;
                self.inner.live.fetch_sub(1, Ordering::SeqCst);
                self.inner.close_bounded(entry, CloseReason::Expired).await;
            }

            // The connect runs in its own task so that a cancelled caller
            // still leaves the slot consistent.
            let inner = self.inner.clone();
            let task_key = key.clone();
            let lease = tokio::spawn(async move { inner.establish(state, task_key).await })
                .await
                .map_err(|e| Error::internal(format!("session connect task failed: {}", e)))??;
            self.record_acquire(key, &lease, started);
            return Ok(lease);
        }
    }

    fn record_acquire(&self, key: &SessionKey, lease: &SessionLease, started: Instant) {
        tracing::debug!(
            key = %key,
            strategy = lease.strategy().as_str(),
            query_count = lease.query_count(),
            "Session acquired"
        );
        metrics::track_acquire(
            key.bot_id(),
            lease.strategy(),
            started.elapsed().as_secs_f64(),
        );
    }

    /// Close every idle-expired or disconnected entry that has no active
    /// lease. Returns how many sessions were closed.
    pub async fn sweep(&self) -> usize {
        let slots: Vec<(SessionKey, Slot)> = self
            .inner
            .slots
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut closed = 0;
        for (key, slot) in slots {
            // A locked slot is mid-acquire; look again next round.
            let Ok(mut state) = slot.try_lock() else {
                continue;
            };
            let sweepable = state
                .entry
                .as_ref()
                .map_or(true, |e| e.is_sweepable(self.inner.config.ttl));
            if !sweepable {
                continue;
            }
            let entry = self.inner.retire(&key, &slot, &mut state);
            drop(state);

            if let Some(entry) = entry {
                self.inner.close_bounded(entry, CloseReason::Expired).await;
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::debug!(closed, "Swept expired sessions");
        }
        metrics::set_live_sessions(self.len());
        closed
    }

    /// Explicitly close the session for `key`. Returns whether one existed.
    pub async fn invalidate(&self, key: &SessionKey) -> bool {
        let Some(slot) = self.inner.slots.get(key).map(|r| r.value().clone()) else {
            return false;
        };
        let mut state = slot.lock().await;
        let entry = self.inner.retire(key, &slot, &mut state);
        drop(state);

        match entry {
            Some(entry) => {
                tracing::info!(key = %key, "Invalidating session");
                self.inner.close_bounded(entry, CloseReason::Invalidated).await;
                true
            }
            None => false,
        }
    }

    /// Close every session in parallel, waiting at most `grace`.
    ///
    /// Disconnects that outlive the grace period keep running in the
    /// background and are reported as abandoned.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return DrainReport::default();
        }
        let _ = self.inner.shutdown_tx.send(true);

        let slots: Vec<(SessionKey, Slot)> = self
            .inner
            .slots
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        tracing::info!(sessions = slots.len(), grace = ?grace, "Draining sessions");

        let deadline = Instant::now() + grace;
        let mut tasks = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let inner = self.inner.clone();
            let task_key = key.clone();
            let task = tokio::spawn(async move {
                let mut state = slot.lock().await;
                let entry = inner.retire(&task_key, &slot, &mut state);
                drop(state);

                let Some(entry) = entry else {
                    return false;
                };
                let started = Instant::now();
                entry.close(CloseReason::Shutdown).await;
                if Instant::now() > deadline {
                    tracing::warn!(
                        key = %task_key,
                        elapsed = ?started.elapsed(),
                        "Session disconnect finished after the shutdown grace period"
                    );
                }
                true
            });
            tasks.push((key, task));
        }

        let mut report = DrainReport::default();
        for (key, task) in tasks {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(true)) => report.closed += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::error!(key = %key, error = %e, "Session close task failed"),
                Err(_) => {
                    tracing::warn!(key = %key, "Session disconnect exceeded shutdown grace period");
                    report.abandoned.push(key);
                }
            }
        }
        metrics::set_live_sessions(self.len());
        tracing::info!(
            closed = report.closed,
            abandoned = report.abandoned.len(),
            "Session drain complete"
        );
        report
    }

    /// Sessions currently holding a handle.
    pub fn len(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Point-in-time view of settled sessions; slots mid-acquire are skipped.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut out: Vec<SessionSnapshot> = self
            .inner
            .slots
            .iter()
            .filter_map(|r| {
                let state = r.value().try_lock().ok()?;
                state.entry.as_ref().map(|e| e.snapshot())
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

impl CacheInner {
    /// Warm or Cold connect for `key`, holding the slot lock throughout.
    async fn establish(
        self: Arc<Self>,
        mut state: OwnedMutexGuard<SlotState>,
        key: SessionKey,
    ) -> Result<SessionLease> {
        let profile = self.policy.allowed_operations(key.bot_id())?;

        let persisted = match self.conversations.load(&key).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not read persisted conversation id");
                None
            }
        };

        let (handle, strategy, resume_rejected) = match persisted {
            Some(resume_id) => {
                match self
                    .engine
                    .connect(key.bot_id(), &profile, Some(resume_id.as_str()))
                    .await
                {
                    Ok(handle) => (handle, AcquireStrategy::Warm, false),
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            resume_id = %resume_id,
                            error = %e,
                            "Engine rejected resume, starting a new conversation"
                        );
                        // The persisted id stays until a new conversation exists.
                        let handle = self.engine.connect(key.bot_id(), &profile, None).await?;
                        (handle, AcquireStrategy::Cold, true)
                    }
                }
            }
            None => {
                let handle = self.engine.connect(key.bot_id(), &profile, None).await?;
                (handle, AcquireStrategy::Cold, false)
            }
        };
        let handle: Arc<dyn AgentHandle> = Arc::from(handle);

        if self.closing.load(Ordering::SeqCst) {
            if let Err(e) = handle.disconnect().await {
                tracing::warn!(key = %key, error = %e, "Disconnect of late session failed");
            }
            return Err(Error::ShuttingDown);
        }

        let conversation_id = handle.conversation_id();
        if let Some(id) = &conversation_id {
            if let Err(e) = self.conversations.save(&key, id).await {
                tracing::warn!(key = %key, error = %e, "Could not persist conversation id");
            }
        } else if resume_rejected {
            if let Err(e) = self.conversations.remove(&key).await {
                tracing::warn!(key = %key, error = %e, "Could not drop stale conversation id");
            }
        }

        let entry = Arc::new(SessionEntry::new(
            key.clone(),
            handle,
            profile,
            conversation_id,
        ));
        state.entry = Some(entry.clone());
        self.live.fetch_add(1, Ordering::SeqCst);
        let lease = SessionLease::new(entry, strategy);
        drop(state);

        metrics::set_live_sessions(self.live.load(Ordering::SeqCst));
        Ok(lease)
    }

    /// Take the slot out of service. Caller holds the slot lock.
    fn retire(
        &self,
        key: &SessionKey,
        slot: &Slot,
        state: &mut SlotState,
    ) -> Option<Arc<SessionEntry>> {
        state.retired = true;
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        let entry = state.entry.take();
        if entry.is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        entry
    }

    /// Close `entry`, waiting at most the disconnect timeout. A slower
    /// disconnect finishes in the background.
    async fn close_bounded(&self, entry: Arc<SessionEntry>, reason: CloseReason) {
        let key = entry.key.clone();
        let task = tokio::spawn(async move { entry.close(reason).await });
        if tokio::time::timeout(self.config.disconnect_timeout, task)
            .await
            .is_err()
        {
            tracing::warn!(
                key = %key,
                timeout = ?self.config.disconnect_timeout,
                "Session disconnect still running, continuing in background"
            );
        }
    }
}
