//! Axum-based HTTP server for the relay.

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agent_relay_controller::{Orchestrator, SessionCache};
use agent_relay_core::config::ServerConfig;
use agent_relay_core::{Error, InboundMessage, OrchestratedReply, Result, SessionSnapshot};
use agent_relay_store::FileRegistry;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Origins allowed by CORS. Empty means any.
    pub allowed_origins: Vec<String>,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: Vec::new(),
            enable_tracing: true,
        }
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            allowed_origins: config.allowed_origins.clone(),
            enable_tracing: true,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub files: Arc<FileRegistry>,
}

impl AppState {
    fn sessions(&self) -> &SessionCache {
        self.orchestrator.sessions()
    }
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(
        config: GatewayConfig,
        orchestrator: Arc<Orchestrator>,
        files: Arc<FileRegistry>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                orchestrator,
                files,
            }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/chat", post(chat_handler))
            .route("/v1/sessions", get(sessions_handler))
            .route("/files/:token", get(download_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        router = router.layer(self.cors_layer());

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if self.config.allowed_origins.iter().any(|o| o == "*") {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = self
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        if origins.is_empty() {
            layer.allow_origin(Any)
        } else {
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }

    /// Run the server until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Run the server until `signal` resolves, then stop accepting
    /// connections and let in-flight requests finish.
    pub async fn run_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::config(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Chat request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Conversation scope (room / channel).
    pub scope_id: String,
    /// Bot identity to address.
    pub bot_id: String,
    /// Message content.
    pub message: String,
    /// Optional sender.
    #[serde(default)]
    pub sender: Option<String>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
    /// Live agent sessions.
    pub sessions: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Core error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::NotFound(_) | Error::NotFoundOrExpired(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Expired(_) => (StatusCode::GONE, "EXPIRED"),
            Error::EngineUnavailable(_) | Error::Timeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE")
            }
            Error::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            Error::PolicyViolation { .. } => (StatusCode::FORBIDDEN, "POLICY_VIOLATION"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if matches!(self.0, Error::NotFoundOrExpired(_) | Error::Expired(_)) {
            "This link or session is no longer valid.".to_string()
        } else if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
            "Internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: if state.sessions().is_shutting_down() {
            "draining".to_string()
        } else {
            "ok".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions().len(),
    })
}

/// Chat handler.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> std::result::Result<Json<OrchestratedReply>, ApiError> {
    if payload.scope_id.trim().is_empty() || payload.bot_id.trim().is_empty() {
        return Err(Error::invalid_request("scope_id and bot_id are required").into());
    }

    let mut message = InboundMessage::new(payload.scope_id, payload.bot_id, payload.message);
    if let Some(sender) = payload.sender {
        message = message.with_sender(sender);
    }
    tracing::info!(
        trace_id = %message.trace_id,
        key = %message.session_key(),
        message_len = message.text.len(),
        "Processing chat request"
    );

    let reply = state.orchestrator.handle(message).await?;
    Ok(Json(reply))
}

/// Live session listing.
async fn sessions_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions().snapshot())
}

/// Stream a registered file.
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let entry = state.files.resolve(&token)?;
    let file = tokio::fs::File::open(&entry.absolute_path)
        .await
        .map_err(|e| {
            tracing::warn!(path = %entry.absolute_path.display(), error = %e, "Registered file is gone");
            Error::not_found_or_expired("download link")
        })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, entry.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&entry.display_name),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError(Error::internal(format!("Failed to build response: {}", e))))
}

/// `attachment; filename="..."` with characters that would break the header
/// replaced.
fn content_disposition(display_name: &str) -> String {
    let safe: String = display_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
