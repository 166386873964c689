//! Request handlers
//!
//! Each handler parses its input, calls one dispatcher operation and
//! serializes the result. Parsing failures become `InvalidFormat`.

use super::error::ApiResult;
use super::AppContext;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use partyq_common::{PlayerAction, QueueType, SchedulerState, SessionId, Track, TrackId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatch::QueueStatus;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub password: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct TracksQuery {
    pub pattern: String,
    pub max_entries: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TracksResponse {
    pub tracks: Vec<Track>,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct AddTrackRequest {
    pub session_id: SessionId,
    pub track_id: TrackId,
    pub queue_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveTrackRequest {
    pub session_id: SessionId,
    pub track_id: TrackId,
    pub queue_type: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub session_id: SessionId,
    pub track_id: TrackId,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub session_id: SessionId,
    pub track_id: TrackId,
    /// Non-zero votes up, zero withdraws
    pub vote: i64,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub session_id: SessionId,
    pub player_action: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: String,
    pub scheduler_state: SchedulerState,
}

fn empty() -> Json<Value> {
    Json(json!({}))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let uptime = chrono::Utc::now().signed_duration_since(ctx.startup_time);
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "partyq".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        backend: ctx.backend_name.to_string(),
        scheduler_state: ctx.scheduler.state().await,
    })
}

/// POST /api/v1/session
pub async fn generate_session(
    State(ctx): State<AppContext>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let Json(req) = payload?;
    let session_id = ctx
        .dispatcher
        .generate_session(req.password, req.nickname)
        .await?;
    Ok(Json(SessionResponse { session_id }))
}

/// GET /api/v1/tracks?pattern=&max_entries=
pub async fn query_tracks(
    State(ctx): State<AppContext>,
    query: Result<Query<TracksQuery>, QueryRejection>,
) -> ApiResult<Json<TracksResponse>> {
    let Query(q) = query?;
    let tracks = ctx.dispatcher.query_tracks(&q.pattern, q.max_entries).await?;
    Ok(Json(TracksResponse { tracks }))
}

/// GET /api/v1/queue?session_id=
pub async fn get_current_queues(
    State(ctx): State<AppContext>,
    query: Result<Query<QueueQuery>, QueryRejection>,
) -> ApiResult<Json<QueueStatus>> {
    let Query(q) = query?;
    Ok(Json(ctx.dispatcher.get_current_queues(&q.session_id).await?))
}

/// POST /api/v1/queue/track
pub async fn add_track_to_queue(
    State(ctx): State<AppContext>,
    payload: Result<Json<AddTrackRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let queue_type = match req.queue_type.as_deref() {
        Some(s) => s.parse::<QueueType>()?,
        None => QueueType::Normal,
    };
    ctx.dispatcher
        .add_track_to_queue(&req.session_id, &req.track_id, queue_type)
        .await?;
    Ok(empty())
}

/// PUT /api/v1/queue/track
pub async fn move_track(
    State(ctx): State<AppContext>,
    payload: Result<Json<MoveTrackRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let queue_type: QueueType = req.queue_type.parse()?;
    ctx.dispatcher
        .move_track(&req.session_id, &req.track_id, queue_type)
        .await?;
    Ok(empty())
}

/// DELETE /api/v1/queue/track
pub async fn remove_track(
    State(ctx): State<AppContext>,
    payload: Result<Json<TrackRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    ctx.dispatcher
        .remove_track(&req.session_id, &req.track_id)
        .await?;
    Ok(empty())
}

/// PUT /api/v1/track/vote
pub async fn vote_track(
    State(ctx): State<AppContext>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    ctx.dispatcher
        .vote_track(&req.session_id, &req.track_id, req.vote != 0)
        .await?;
    Ok(empty())
}

/// PUT /api/v1/player/control
pub async fn control_player(
    State(ctx): State<AppContext>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let action: PlayerAction = req.player_action.parse()?;
    ctx.dispatcher.control_player(&req.session_id, action).await?;
    Ok(empty())
}
