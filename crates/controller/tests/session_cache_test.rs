use std::sync::Arc;
use std::time::Duration;

use agent_relay_controller::{SessionCache, SessionCacheConfig};
use agent_relay_core::mocks::MockAgentEngine;
use agent_relay_core::{AcquireStrategy, ConversationStore, Error, SessionKey};
use agent_relay_governance::CapabilityPolicy;
use agent_relay_store::InMemoryConversationStore;

const POLICY: &str = r#"
bots:
  - id: helper
    operations: [read-file, search-file, delegate, execute-shell]
  - id: fast-a
    operations: [read-file]
  - id: fast-b
    operations: [read-file]
  - id: slow
    operations: [read-file]
"#;

struct Harness {
    engine: MockAgentEngine,
    store: Arc<InMemoryConversationStore>,
    cache: SessionCache,
}

fn harness_with(engine: MockAgentEngine, ttl: Duration) -> Harness {
    let store = Arc::new(InMemoryConversationStore::new());
    let policy = Arc::new(CapabilityPolicy::from_yaml(POLICY).unwrap());
    let cache = SessionCache::new(
        Arc::new(engine.clone()),
        policy,
        store.clone(),
        SessionCacheConfig {
            ttl,
            sweep_interval: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
        },
    );
    Harness {
        engine,
        store,
        cache,
    }
}

fn harness() -> Harness {
    harness_with(MockAgentEngine::new(), Duration::from_secs(60))
}

fn key(bot: &str) -> SessionKey {
    SessionKey::new("room-1", bot)
}

#[tokio::test(start_paused = true)]
async fn test_cold_then_hot_increments_query_count() -> anyhow::Result<()> {
    let h = harness();

    let first = h.cache.acquire(&key("helper")).await?;
    assert_eq!(first.strategy(), AcquireStrategy::Cold);
    assert_eq!(first.query_count(), 1);
    assert_eq!(first.conversation_id(), Some("conv-1"));
    drop(first);

    let second = h.cache.acquire(&key("helper")).await?;
    assert_eq!(second.strategy(), AcquireStrategy::Hot);
    assert_eq!(second.query_count(), 2);
    assert_eq!(h.engine.connect_count(), 1);
    assert_eq!(h.cache.len(), 1);

    // Privileged tags never reach the engine.
    let calls = h.engine.connect_calls();
    assert_eq!(calls[0].profile.tags(), vec!["read-file", "search-file", "delegate"]);
    assert_eq!(
        h.store.load(&key("helper")).await?.as_deref(),
        Some("conv-1")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_one_handle() {
    let engine = MockAgentEngine::new().with_connect_delay(Duration::from_millis(200));
    let h = harness_with(engine, Duration::from_secs(60));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cache = h.cache.clone();
        tasks.push(tokio::spawn(async move {
            let lease = cache.acquire(&key("helper")).await.unwrap();
            (lease.strategy(), lease.query_count())
        }));
    }

    let mut cold = 0;
    let mut counts = Vec::new();
    for task in tasks {
        let (strategy, count) = task.await.unwrap();
        if strategy == AcquireStrategy::Cold {
            cold += 1;
        }
        counts.push(count);
    }
    counts.sort_unstable();

    assert_eq!(h.engine.connect_count(), 1);
    assert_eq!(cold, 1);
    assert_eq!(counts, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test(start_paused = true)]
async fn test_different_keys_do_not_wait_on_each_other() {
    let engine = MockAgentEngine::new().with_connect_delay(Duration::from_secs(10));
    let h = harness_with(engine, Duration::from_secs(60));

    let started = tokio::time::Instant::now();
    let key_a = SessionKey::new("room-1", "helper");
    let key_b = SessionKey::new("room-2", "helper");
    let (a, b) = tokio::join!(
        h.cache.acquire(&key_a),
        h.cache.acquire(&key_b),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.engine.connect_count(), 2);
    assert!(started.elapsed() < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_warm_resume_after_ttl() -> anyhow::Result<()> {
    let h = harness();

    drop(h.cache.acquire(&key("helper")).await?);
    tokio::time::advance(Duration::from_secs(61)).await;

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Warm);
    assert_eq!(lease.query_count(), 1);

    let calls = h.engine.connect_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].resume_id.as_deref(), Some("conv-1"));
    // The stale handle was closed before reconnecting.
    assert_eq!(h.engine.disconnect_count(1), 1);
    assert_eq!(h.engine.live_handles(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_just_under_ttl_is_still_hot() -> anyhow::Result<()> {
    let h = harness();

    drop(h.cache.acquire(&key("helper")).await?);
    tokio::time::advance(Duration::from_secs(59)).await;

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Hot);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_resume_falls_back_to_cold() -> anyhow::Result<()> {
    let h = harness();
    h.store.save(&key("helper"), "conv-gone").await?;
    h.engine.reject_resume(true);

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Cold);
    assert_eq!(lease.conversation_id(), Some("conv-1"));
    assert_eq!(
        h.store.load(&key("helper")).await?.as_deref(),
        Some("conv-1")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_handle_is_replaced() -> anyhow::Result<()> {
    let h = harness();
    h.engine.fail_next_invokes(1);

    let lease = h.cache.acquire(&key("helper")).await?;
    let request = agent_relay_core::RequestContext {
        trace_id: "t".into(),
        key: key("helper"),
        message: "hi".into(),
        sender: None,
        directive: String::new(),
        profile: lease.profile().clone(),
    };
    assert!(lease.invoke(&request).await.is_err());
    assert!(!lease.handle().is_connected());
    drop(lease);

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Warm);
    assert_eq!(h.engine.disconnect_count(1), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unknown_bot_is_not_found() {
    let h = harness();
    let err = h.cache.acquire(&key("ghost")).await.err().unwrap();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.engine.connect_count(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_surfaces_and_next_acquire_retries() {
    let h = harness();
    h.engine.fail_next_connects(1);

    let err = h.cache.acquire(&key("helper")).await.err().unwrap();
    assert!(matches!(err, Error::EngineUnavailable(_)));

    let lease = h.cache.acquire(&key("helper")).await.unwrap();
    assert_eq!(lease.strategy(), AcquireStrategy::Cold);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_skips_leased_sessions() -> anyhow::Result<()> {
    let h = harness();

    let held = h.cache.acquire(&key("fast-a")).await?;
    drop(h.cache.acquire(&key("fast-b")).await?);
    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(h.cache.sweep().await, 1);
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.engine.total_disconnects(), 1);

    drop(held);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(h.cache.sweep().await, 1);
    assert!(h.cache.is_empty());
    assert_eq!(h.engine.live_handles(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_closes_idle_sessions() -> anyhow::Result<()> {
    let h = harness();
    h.cache.start();

    drop(h.cache.acquire(&key("helper")).await?);
    tokio::time::sleep(Duration::from_secs(75)).await;

    assert_eq!(h.engine.disconnect_count(1), 1);
    assert!(h.cache.is_empty());
    assert!(h.cache.snapshot().is_empty());

    let report = h.cache.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.closed, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failing_disconnect_still_removes_entry() -> anyhow::Result<()> {
    let h = harness();
    h.engine.fail_disconnects(true);

    drop(h.cache.acquire(&key("helper")).await?);
    assert!(h.cache.invalidate(&key("helper")).await);
    assert!(h.cache.is_empty());
    assert!(!h.cache.invalidate(&key("helper")).await);

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Warm);
    assert_eq!(h.engine.connect_count(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_exactly_once_under_races() {
    let h = harness_with(MockAgentEngine::new(), Duration::from_secs(1));

    for _ in 0..20 {
        drop(h.cache.acquire(&key("helper")).await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;

        let invalidate_key = key("helper");
        let acquire_key = key("helper");
        let (_, _, lease) = tokio::join!(
            h.cache.sweep(),
            h.cache.invalidate(&invalidate_key),
            h.cache.acquire(&acquire_key),
        );
        drop(lease);
    }

    let report = h.cache.shutdown(Duration::from_secs(5)).await;
    assert!(report.abandoned.is_empty());

    let calls = h.engine.connect_calls();
    assert!(calls.len() >= 20);
    for call in calls {
        assert_eq!(h.engine.disconnect_count(call.handle_id), 1, "handle {}", call.handle_id);
    }
    assert_eq!(h.engine.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drain_with_grace_period() {
    let engine = MockAgentEngine::new()
        .with_disconnect_delay("fast-a", Duration::from_millis(50))
        .with_disconnect_delay("fast-b", Duration::from_millis(50))
        .with_disconnect_delay("slow", Duration::from_secs(40));
    let h = harness_with(engine, Duration::from_secs(1800));

    for bot in ["fast-a", "fast-b", "slow"] {
        drop(h.cache.acquire(&key(bot)).await.unwrap());
    }
    assert_eq!(h.cache.len(), 3);

    let started = tokio::time::Instant::now();
    let report = h.cache.shutdown(Duration::from_secs(30)).await;
    let elapsed = started.elapsed();

    assert_eq!(report.closed, 2);
    assert_eq!(report.abandoned, vec![key("slow")]);
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    assert_eq!(h.engine.disconnect_count(1), 1);
    assert_eq!(h.engine.disconnect_count(2), 1);
    assert_eq!(h.engine.disconnect_count(3), 0);

    // The abandoned disconnect keeps running in the background.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.engine.disconnect_count(3), 1);
    assert_eq!(h.engine.live_handles(), 0);

    assert!(matches!(
        h.cache.acquire(&key("fast-a")).await.err().unwrap(),
        Error::ShuttingDown
    ));
    let again = h.cache.shutdown(Duration::from_secs(30)).await;
    assert_eq!(again.closed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_leaves_usable_session() {
    let engine = MockAgentEngine::new().with_connect_delay(Duration::from_secs(10));
    let h = harness_with(engine, Duration::from_secs(60));

    let cache = h.cache.clone();
    let waiter = tokio::spawn(async move { cache.acquire(&key("helper")).await.map(|_| ()) });
    tokio::time::sleep(Duration::from_secs(1)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_secs(20)).await;
    let snapshot = h.cache.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].in_flight, 0);

    let lease = h.cache.acquire(&key("helper")).await.unwrap();
    assert_eq!(lease.strategy(), AcquireStrategy::Hot);
    assert_eq!(h.engine.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_is_sorted() -> anyhow::Result<()> {
    let h = harness();
    drop(h.cache.acquire(&key("slow")).await?);
    drop(h.cache.acquire(&key("fast-a")).await?);
    drop(h.cache.acquire(&key("fast-a")).await?);

    let snapshot = h.cache.snapshot();
    let keys: Vec<String> = snapshot.iter().map(|s| s.key.to_string()).collect();
    assert_eq!(keys, vec!["room-1/fast-a", "room-1/slow"]);
    assert_eq!(snapshot[0].query_count, 2);
    assert_eq!(snapshot[0].conversation_id.as_deref(), Some("conv-2"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slow_stale_disconnect_is_bounded_on_acquire() -> anyhow::Result<()> {
    let engine = MockAgentEngine::new().with_disconnect_delay("slow", Duration::from_secs(40));
    let h = harness_with(engine, Duration::from_secs(1));

    drop(h.cache.acquire(&key("slow")).await?);
    tokio::time::advance(Duration::from_secs(2)).await;

    let started = tokio::time::Instant::now();
    let lease = h.cache.acquire(&key("slow")).await?;
    let elapsed = started.elapsed();
    assert_eq!(lease.strategy(), AcquireStrategy::Warm);
    assert!(elapsed < Duration::from_secs(6), "acquire waited {:?}", elapsed);
    drop(lease);

    // The old handle still gets its single disconnect in the background.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(h.engine.disconnect_count(1), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_outage_keeps_persisted_conversation_id() -> anyhow::Result<()> {
    let h = harness();
    h.store.save(&key("helper"), "conv-keep").await?;
    h.engine.fail_next_connects(2);

    let err = h.cache.acquire(&key("helper")).await.err().unwrap();
    assert!(matches!(err, Error::EngineUnavailable(_)));
    assert_eq!(
        h.store.load(&key("helper")).await?.as_deref(),
        Some("conv-keep")
    );

    let lease = h.cache.acquire(&key("helper")).await?;
    assert_eq!(lease.strategy(), AcquireStrategy::Warm);
    assert_eq!(lease.conversation_id(), Some("conv-keep"));
    assert_eq!(h.engine.connect_calls()[0].resume_id.as_deref(), Some("conv-keep"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_leased_session_is_not_closed_by_second_acquire() -> anyhow::Result<()> {
    let h = harness_with(MockAgentEngine::new(), Duration::from_secs(1));

    let held = h.cache.acquire(&key("helper")).await?;
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(h.cache.sweep().await, 0);

    let second = h.cache.acquire(&key("helper")).await?;
    assert_eq!(second.strategy(), AcquireStrategy::Hot);
    assert_eq!(second.query_count(), 2);
    assert!(held.handle().is_connected());
    assert_eq!(h.engine.disconnect_count(1), 0);
    assert_eq!(h.engine.connect_count(), 1);
    Ok(())
}
