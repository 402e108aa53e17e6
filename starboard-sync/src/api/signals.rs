//! Signal notifications from the gateway bridge
//!
//! POST /signals/added, POST /signals/removed, POST /signals/mirror-deleted

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::services::SignalOutcome;
use crate::types::{GuildId, MessageId, SignalEvent};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub origin_id: MessageId,
    pub outcome: SignalOutcome,
}

/// A post in the mirror channel was deleted
#[derive(Debug, Deserialize)]
pub struct MirrorDeletedRequest {
    pub guild_id: GuildId,
    pub message_id: MessageId,
}

pub async fn signal_added(
    State(state): State<AppState>,
    Json(event): Json<SignalEvent>,
) -> ApiResult<Json<SignalResponse>> {
    let outcome = state.synchronizer.handle_signal_added(&event).await?;
    tracing::debug!(origin_id = event.message_id, ?outcome, "Signal added handled");
    Ok(Json(SignalResponse {
        origin_id: event.message_id,
        outcome,
    }))
}

pub async fn signal_removed(
    State(state): State<AppState>,
    Json(event): Json<SignalEvent>,
) -> ApiResult<Json<SignalResponse>> {
    let outcome = state.synchronizer.handle_signal_removed(&event).await?;
    tracing::debug!(origin_id = event.message_id, ?outcome, "Signal removed handled");
    Ok(Json(SignalResponse {
        origin_id: event.message_id,
        outcome,
    }))
}

pub async fn mirror_deleted(
    State(state): State<AppState>,
    Json(request): Json<MirrorDeletedRequest>,
) -> ApiResult<Json<SignalResponse>> {
    let outcome = state
        .synchronizer
        .handle_mirror_deleted(request.guild_id, request.message_id)
        .await?;
    Ok(Json(SignalResponse {
        origin_id: request.message_id,
        outcome,
    }))
}

pub fn signal_routes() -> Router<AppState> {
    Router::new()
        .route("/signals/added", post(signal_added))
        .route("/signals/removed", post(signal_removed))
        .route("/signals/mirror-deleted", post(mirror_deleted))
}
