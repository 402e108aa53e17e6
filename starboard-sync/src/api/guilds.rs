//! Per-guild configuration, reconciliation jobs and the fast-mode override
//!
//! GET|PUT /guilds/{guild_id}/config
//! POST /guilds/{guild_id}/rebuild, POST /guilds/{guild_id}/audit
//! POST /guilds/{guild_id}/override, POST /guilds/{guild_id}/override/confirm

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use starboard_common::events::JobKind;

use crate::db::guild_config::{set_guild_config, GuildConfigUpdate};
use crate::error::{ApiError, ApiResult, MirrorError};
use crate::services::Challenge;
use crate::types::{GuildConfig, GuildId};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct JobRequest {
    /// Skip throttling; needs a confirmed override
    #[serde(default)]
    pub fast: bool,
    /// Run inline and return the report instead of answering 202
    #[serde(default)]
    pub wait: bool,
}

/// 202 response for a job started in the background
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub guild_id: GuildId,
    pub kind: JobKind,
    pub fast: bool,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub guild_id: GuildId,
    pub armed: bool,
}

/// GET /guilds/{guild_id}/config
pub async fn get_config(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> ApiResult<Json<GuildConfig>> {
    Ok(Json(state.publisher.guild_config(guild_id).await?))
}

/// PUT /guilds/{guild_id}/config
pub async fn put_config(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(update): Json<GuildConfigUpdate>,
) -> ApiResult<Json<GuildConfig>> {
    set_guild_config(&state.db, guild_id, &update).await?;
    Ok(Json(state.publisher.guild_config(guild_id).await?))
}

/// POST /guilds/{guild_id}/rebuild
pub async fn start_rebuild(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    request: Option<Json<JobRequest>>,
) -> ApiResult<Response> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    start_job(state, guild_id, JobKind::Rebuild, request).await
}

/// POST /guilds/{guild_id}/audit
pub async fn start_audit(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    request: Option<Json<JobRequest>>,
) -> ApiResult<Response> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    start_job(state, guild_id, JobKind::AuditRepair, request).await
}

async fn start_job(
    state: AppState,
    guild_id: GuildId,
    kind: JobKind,
    request: JobRequest,
) -> ApiResult<Response> {
    let JobRequest { fast, wait } = request;
    if wait {
        let report = match kind {
            JobKind::Rebuild => serde_json::to_value(state.reconciler.run_rebuild(guild_id, fast).await?),
            JobKind::AuditRepair => {
                serde_json::to_value(state.reconciler.run_audit_repair(guild_id, fast).await?)
            }
        }
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        return Ok(Json(report).into_response());
    }

    // fail fast on the cheap checks; the job re-checks them itself
    state.publisher.configured(guild_id).await?;
    if state.reconciler.is_running(guild_id) {
        return Err(MirrorError::JobAlreadyRunning(guild_id).into());
    }
    if fast && !state.reconciler.gate().is_armed(guild_id) {
        return Err(MirrorError::OverrideNotConfirmed(guild_id).into());
    }

    let reconciler = state.reconciler.clone();
    tokio::spawn(async move {
        // the reconciler logs and publishes the outcome itself
        let result = match kind {
            JobKind::Rebuild => reconciler.run_rebuild(guild_id, fast).await.map(drop),
            JobKind::AuditRepair => reconciler.run_audit_repair(guild_id, fast).await.map(drop),
        };
        if let Err(e) = result {
            tracing::error!(guild_id, %kind, error = %e, "Background reconciliation job failed");
        }
    });

    let accepted = JobAccepted {
        guild_id,
        kind,
        fast,
        accepted_at: Utc::now(),
    };
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// POST /guilds/{guild_id}/override
pub async fn request_override(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> ApiResult<Json<Challenge>> {
    state.publisher.configured(guild_id).await?;
    Ok(Json(state.reconciler.gate().request(guild_id)))
}

/// POST /guilds/{guild_id}/override/confirm
pub async fn confirm_override(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<ConfirmResponse>> {
    state.reconciler.gate().confirm(guild_id, &request.code)?;
    Ok(Json(ConfirmResponse {
        guild_id,
        armed: true,
    }))
}

pub fn guild_routes() -> Router<AppState> {
    Router::new()
        .route("/guilds/:guild_id/config", get(get_config).put(put_config))
        .route("/guilds/:guild_id/rebuild", post(start_rebuild))
        .route("/guilds/:guild_id/audit", post(start_audit))
        .route("/guilds/:guild_id/override", post(request_override))
        .route("/guilds/:guild_id/override/confirm", post(confirm_override))
}
