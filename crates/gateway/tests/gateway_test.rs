use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use agent_relay_controller::{Orchestrator, SessionCache, SessionCacheConfig};
use agent_relay_core::mocks::MockAgentEngine;
use agent_relay_gateway::{GatewayConfig, GatewayServer};
use agent_relay_governance::{CapabilityEnforcer, CapabilityPolicy, InMemoryAuditStore};
use agent_relay_store::{FileRegistry, InMemoryConversationStore};

const POLICY: &str = r#"
bots:
  - id: helper
    operations: [read-file, search-file]
"#;

struct Harness {
    files: Arc<FileRegistry>,
    app: Router,
}

fn harness() -> Harness {
    let engine = MockAgentEngine::new();
    let policy = Arc::new(CapabilityPolicy::from_yaml(POLICY).unwrap());
    let files = Arc::new(FileRegistry::new(
        Duration::from_secs(3600),
        "https://relay.example.com/",
    ));
    let sessions = SessionCache::new(
        Arc::new(engine.clone()),
        policy.clone(),
        Arc::new(InMemoryConversationStore::new()),
        SessionCacheConfig::default(),
    );
    let orchestrator = Orchestrator::new(
        sessions,
        Arc::new(engine),
        policy,
        files.clone(),
        Arc::new(CapabilityEnforcer::new(Arc::new(InMemoryAuditStore::new()))),
    );
    let server = GatewayServer::new(GatewayConfig::default(), Arc::new(orchestrator), files.clone());

    Harness {
        files,
        app: server.build_router(),
    }
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn chat(app: &Router, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness();
    let response = get(&h.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn test_chat_endpoint_reuses_session() {
    let h = harness();

    let response = chat(
        &h.app,
        json!({"scope_id": "room-1", "bot_id": "helper", "message": "hello", "sender": "alice"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["text"], "helper: hello");
    assert_eq!(json["strategy"], "cold");
    assert_eq!(json["query_count"], 1);

    let json = body_json(
        chat(&h.app, json!({"scope_id": "room-1", "bot_id": "helper", "message": "again"})).await,
    )
    .await;
    assert_eq!(json["strategy"], "hot");
    assert_eq!(json["query_count"], 2);

    let sessions = body_json(get(&h.app, "/v1/sessions").await).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["key"]["scope_id"], "room-1");
    assert_eq!(sessions[0]["key"]["bot_id"], "helper");
    assert_eq!(sessions[0]["query_count"], 2);
    assert_eq!(sessions[0]["in_flight"], 0);
}

#[tokio::test]
async fn test_chat_error_statuses() {
    let h = harness();

    let response = chat(&h.app, json!({"scope_id": "room-1", "bot_id": "ghost", "message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = chat(&h.app, json!({"scope_id": " ", "bot_id": "helper", "message": "hi"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_streams_file_with_headers() -> anyhow::Result<()> {
    let h = harness();
    let dir = tempfile::tempdir()?;
    let deck = dir.path().join("deck.pptx");
    std::fs::write(&deck, b"slide bytes")?;

    let token = h.files.register(&deck, "Q3 deck.pptx", None, None).await?;
    let response = get(&h.app, &format!("/files/{}", token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.openxmlformats-officedocument.presentationml.presentation"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Q3 deck.pptx\""
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], b"slide bytes");
    Ok(())
}

#[tokio::test]
async fn test_download_unknown_expired_or_vanished_is_not_found() -> anyhow::Result<()> {
    let h = harness();
    let dir = tempfile::tempdir()?;
    let report = dir.path().join("report.csv");
    std::fs::write(&report, b"a,b\n1,2\n")?;

    let response = get(&h.app, "/files/not-a-real-token").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let expired = h
        .files
        .register(&report, "report.csv", None, Some(Duration::ZERO))
        .await?;
    let response = get(&h.app, &format!("/files/{}", expired)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let vanished = h.files.register(&report, "report.csv", None, None).await?;
    std::fs::remove_file(&report)?;
    let response = get(&h.app, &format!("/files/{}", vanished)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown and expired links are indistinguishable to the caller.
    let json = body_json(response).await;
    assert_eq!(json["message"], "This link or session is no longer valid.");
    Ok(())
}
