//! HTTP handlers for the inbound event surface.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use yomiage_types::voice::{SpeakerStyle, VoiceProfile, VoiceProfilePatch};
use yomiage_types::{ChannelTarget, Priority, QueueItem, Tier};
use yomiage_voice::{CatalogSource, QueueStatus, VoiceError};

/// Request body for `POST /api/groups/{groupId}/speak`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
    /// Normalized text to read aloud.
    pub text: String,
    /// Speaker style; the target's configured speaker when omitted.
    #[serde(default)]
    pub speaker_id: Option<u32>,
    #[serde(default)]
    pub priority: Priority,
    /// User whose message produced the text.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Tier hint from the billing layer, remembered for the group.
    #[serde(default)]
    pub tier: Option<Tier>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakResponse {
    pub queue_length: usize,
    pub speaker_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub left: bool,
}

#[derive(Debug, Serialize)]
pub struct SpeakersResponse {
    pub source: CatalogSource,
    pub speakers: Vec<SpeakerStyle>,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            VoiceError::Transport(_)
            | VoiceError::Timeout { .. }
            | VoiceError::EngineUnavailable => ApiError::ServiceUnavailable(e.to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `POST /api/groups/{groupId}/speak`.
pub async fn speak_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
    Json(payload): Json<SpeakRequest>,
) -> Result<(StatusCode, Json<SpeakResponse>), ApiError> {
    let runtime = &state.runtime;
    if let Some(tier) = payload.tier {
        runtime.pipeline.set_tier(&group_id, tier);
    }
    let speaker_id = match payload.speaker_id {
        Some(id) => id,
        None => {
            runtime
                .profiles
                .speaker_for(&group_id, payload.user_id.as_deref())
                .await
        }
    };

    let mut item = QueueItem::new(&group_id, payload.text, speaker_id, payload.priority);
    if let Some(user_id) = payload.user_id {
        item = item.with_origin(user_id);
    }
    let queue_length = runtime.queue.enqueue(item)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SpeakResponse {
            queue_length,
            speaker_id,
        }),
    ))
}

/// Handler for `DELETE /api/groups/{groupId}/queue`.
pub async fn clear_queue_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> Json<ClearResponse> {
    let cleared = state.runtime.queue.clear(&group_id);
    Json(ClearResponse { cleared })
}

/// Handler for `GET /api/groups/{groupId}/queue`.
pub async fn queue_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> Json<QueueStatus> {
    Json(state.runtime.queue.status(&group_id))
}

/// Handler for `POST /api/groups/{groupId}/voice/join`.
///
/// Waits until the live session is ready, including the single retry.
pub async fn join_voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
    Json(target): Json<ChannelTarget>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let channel_id = target.channel_id.clone();
    state.runtime.connections.join(&group_id, target).await?;
    Ok(Json(serde_json::json!({
        "groupId": group_id,
        "channelId": channel_id,
        "state": "ready",
    })))
}

/// Handler for `POST /api/groups/{groupId}/voice/leave`.
pub async fn leave_voice_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
) -> Json<LeaveResponse> {
    let left = state.runtime.connections.leave(&group_id).await;
    Json(LeaveResponse { left })
}

/// Handler for `GET /api/speakers`.
pub async fn speakers_handler(Extension(state): Extension<Arc<AppState>>) -> Json<SpeakersResponse> {
    let catalog = &state.runtime.catalog;
    Json(SpeakersResponse {
        source: catalog.source().await,
        speakers: catalog.styles().await,
    })
}

/// Handler for `PUT /api/profiles/{targetId}`.
///
/// Applies a partial update. Out-of-range values are clamped, not rejected.
pub async fn update_profile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(target_id): Path<String>,
    Json(patch): Json<VoiceProfilePatch>,
) -> Result<Json<VoiceProfile>, ApiError> {
    let profile = state.runtime.profiles.update(&target_id, &patch).await?;
    tracing::info!(%target_id, ?profile, "voice profile updated");
    Ok(Json(profile))
}
