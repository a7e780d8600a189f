//! HTTP Server
//!
//! Thin JSON routes over [`SessionService`] plus the operator page.
//!
//! Endpoints:
//! - GET  /                              - operator page
//! - GET  /api/sessions/status           - connection snapshot
//! - POST /api/sessions/messages/send    - send one message to many numbers
//! - GET  /api/sessions/messages/history - recorded batches, newest first
//! - GET  /api/sessions/messages/stats   - aggregate delivery numbers
//! - POST /api/sessions/reconnect        - operator reconnect
//! - GET  /api/health                    - liveness and storage mode

pub mod validate;

use crate::error::{ServiceError, ValidationError};
use crate::services::SessionService;
use crate::storage::models::tally;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const INDEX_HTML: &str = include_str!("index.html");

pub type SharedState = Arc<SessionService>;

// ── Request payloads ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub message: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal {
        context: &'static str,
        message: String,
    },
}

impl ApiError {
    /// Map a service failure; `context` names the failed operation in 500
    /// responses.
    fn service(context: &'static str, err: ServiceError) -> Self {
        if err.is_not_connected() {
            return ApiError::Unavailable(err.to_string());
        }
        tracing::error!("{}: {}", context, err);
        ApiError::Internal {
            context,
            message: err.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Invalid request", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "WhatsApp not connected", msg)
            }
            ApiError::Internal { context, message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, context, message)
            }
        };
        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(service: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/sessions/status", get(get_status))
        .route("/api/sessions/messages/send", post(send_message))
        .route("/api/sessions/messages/history", get(get_history))
        .route("/api/sessions/messages/stats", get(get_stats))
        .route("/api/sessions/reconnect", post(reconnect))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_status(State(service): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let status = service
        .get_status()
        .await
        .map_err(|e| ApiError::service("Failed to get status", e))?;
    Ok(Json(json!({ "success": true, "data": status })))
}

async fn send_message(
    State(service): State<SharedState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate::phone_numbers(&request.phone_numbers)?;
    validate::message(&request.message)?;

    let results = service
        .send_message(&request.phone_numbers, &request.message)
        .await
        .map_err(|e| ApiError::service("Failed to send message", e))?;
    let (total_sent, total_failed) = tally(&results);

    Ok(Json(json!({
        "success": true,
        "data": results,
        "totalSent": total_sent,
        "totalFailed": total_failed,
        "message": "Message sent successfully",
    })))
}

async fn get_history(State(service): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = service
        .get_message_history()
        .await
        .map_err(|e| ApiError::service("Failed to get message history", e))?;
    Ok(Json(json!({ "success": true, "data": messages })))
}

async fn get_stats(State(service): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = service
        .message_stats()
        .await
        .map_err(|e| ApiError::service("Failed to get message statistics", e))?;
    Ok(Json(json!({ "success": true, "data": stats })))
}

async fn reconnect(State(service): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let started = service
        .reconnect()
        .await
        .map_err(|e| ApiError::service("Failed to reconnect", e))?;
    let message = if started {
        "Reconnection initiated"
    } else {
        "Initialization already in progress"
    };
    Ok(Json(json!({ "success": started, "message": message })))
}

async fn health(State(service): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "storage": service.storage_mode().to_string(),
        "version": crate::VERSION,
    }))
}

// ── Serving ───────────────────────────────────────────────────────────

/// Serve until Ctrl-C or SIGTERM, then shut the service down.
pub async fn serve(service: SharedState, host: &str, port: u16) -> Result<()> {
    let app = build_router(service.clone());

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Server running at http://{}", local_addr);
    tracing::info!("Storage mode: {}", service.storage_mode());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
    tracing::info!("Received shutdown signal, shutting down gracefully...");
}
