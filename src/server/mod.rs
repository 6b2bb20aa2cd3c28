//! HTTP surface: chat streaming, pool stats, viewer tokens, health.

pub mod chat;
pub mod error;
pub mod sse;
pub mod vnc_token;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::desktop::http_backend::HttpDesktopBackend;
use crate::desktop::DesktopBackend;
use crate::errors::DeskPilotResult;
use crate::llm::registry::StreamerFactory;
use crate::pool::{PoolStats, SandboxPool};
use chat::{ChatOrchestrator, ChatRequest};
use error::ApiError;
use vnc_token::{TokenAction, TokenRequest, TokenScript};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ChatOrchestrator,
    pub pool: Arc<SandboxPool>,
    pub tokens: Arc<TokenScript>,
}

impl AppState {
    pub fn from_config(config: &AppConfig, backend: Arc<dyn DesktopBackend>) -> Self {
        let pool = Arc::new(SandboxPool::new(backend, &config.pool));
        let factory = Arc::new(StreamerFactory::from_config(&config.providers));
        Self {
            orchestrator: ChatOrchestrator::new(pool.clone(), factory, config.desktop.clone()),
            pool,
            tokens: Arc::new(TokenScript::new(config.vnc.token_script.clone())),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/pool", get(pool_stats))
        .route("/api/vnc-token", post(manage_token).get(list_tokens))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("chat", %request_id);

    // Dropping the response body (client gone) cancels the loop.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    // Setup runs detached so a disconnect mid-setup still reaches the
    // cancellation cleanup instead of abandoning a fresh sandbox.
    let orchestrator = state.orchestrator.clone();
    let setup = tokio::spawn(
        async move { orchestrator.start(request, cancel).await }.instrument(span.clone()),
    );
    let rx = setup
        .await
        .map_err(|e| ApiError::internal(format!("setup task failed: {e}")))??;

    let frames = ReceiverStream::new(rx).map(move |event| {
        let _alive = &guard;
        tracing::trace!(parent: &span, ?event, "frame");
        sse::encode_frame(&event)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError::internal(format!("failed to build event stream response: {e}")))
}

async fn pool_stats(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats().await)
}

async fn manage_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<Value>, ApiError> {
    let action = TokenAction::try_from(&request).map_err(ApiError::bad_request)?;
    let output = state
        .tokens
        .run(&action)
        .await
        .map_err(|e| ApiError::with_details("Failed to manage VNC token", e.to_string()))?;

    let stderr = (!output.stderr.is_empty()).then_some(output.stderr);
    Ok(Json(json!({
        "success": true,
        "action": action.name(),
        "sandboxId": request.sandbox_id,
        "output": output.stdout,
        "error": stderr,
    })))
}

async fn list_tokens(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tokens = state
        .tokens
        .list()
        .await
        .map_err(|e| ApiError::with_details("Failed to list VNC tokens", e.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "count": tokens.len(),
        "tokens": tokens,
    })))
}

/// Bind, serve until Ctrl-C/SIGTERM, then close every pooled sandbox.
pub async fn serve(config: AppConfig) -> DeskPilotResult<()> {
    let backend: Arc<dyn DesktopBackend> = Arc::new(HttpDesktopBackend::from_config(&config.desktop)?);
    let state = AppState::from_config(&config, backend);
    let pool = state.pool.clone();
    tracing::info!(script = %state.tokens.path().display(), "viewer token script");

    let app = create_router(state);
    let listener = TcpListener::bind(config.server.bind.as_str()).await?;
    tracing::info!(bind = %config.server.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown signal received, closing pooled sandboxes");
    pool.close_all().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::agent_engine::state::StreamEvent;
    use crate::desktop::mock::MockBackend;
    use crate::desktop::Resolution;
    use sse::FrameDecoder;

    fn app() -> Router {
        let mut config = AppConfig::default();
        config.pool.enabled = true;
        config.vnc.token_script = "echo".into();
        let backend = MockBackend::new(Resolution::new(1024, 768));
        create_router(AppState::from_config(&config, backend))
    }

    #[tokio::test]
    async fn health_is_ok() {
        let res = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn chat_streams_framed_events() {
        let res = app()
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"messages":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/event-stream");

        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let events = FrameDecoder::new().push(&body).unwrap();
        assert!(matches!(events[0], StreamEvent::SandboxCreated { .. }));
        assert_eq!(events[1], StreamEvent::done());
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn chat_connect_failure_is_plain_error() {
        let config = AppConfig::default();
        let backend = MockBackend::failing_connect(Resolution::new(1024, 768));
        let app = create_router(AppState::from_config(&config, backend));
        let res = app
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"messages":[],"sandboxId":"sbx-x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Failed to connect to sandbox");
    }

    #[tokio::test]
    async fn pool_stats_reports_config() {
        let res = app()
            .oneshot(Request::get("/api/pool").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["enabled"], true);
        assert_eq!(json["maxSize"], 2);
        assert_eq!(json["size"], 0);
    }

    #[tokio::test]
    async fn token_add_without_ip_is_bad_request() {
        let res = app()
            .oneshot(
                Request::post("/api/vnc-token")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"action":"add","sandboxId":"sbx-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_remove_runs_script() {
        let res = app()
            .oneshot(
                Request::post("/api/vnc-token")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"action":"remove","sandboxId":"sbx-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["output"], "remove sbx-1\n");
        assert_eq!(json["error"], Value::Null);
    }
}
