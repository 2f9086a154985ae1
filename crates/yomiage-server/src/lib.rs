//! yomiage server library logic.

pub mod api;
pub mod background;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use yomiage_voice::VoiceRuntime;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The assembled speech pipeline.
    pub runtime: VoiceRuntime,
}

/// Maximum request body size (64 KiB). Texts are short; profiles smaller.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let runtime = &state.runtime;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": if runtime.client.is_healthy() { "available" } else { "unavailable" },
        "sessions": runtime.sessions.len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/groups/{groupId}/speak",
            post(api::speak_handler),
        )
        .route(
            "/api/groups/{groupId}/queue",
            get(api::queue_status_handler).delete(api::clear_queue_handler),
        )
        .route(
            "/api/groups/{groupId}/voice/join",
            post(api::join_voice_handler),
        )
        .route(
            "/api/groups/{groupId}/voice/leave",
            post(api::leave_voice_handler),
        )
        .route("/api/speakers", get(api::speakers_handler))
        .route(
            "/api/profiles/{targetId}",
            put(api::update_profile_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
