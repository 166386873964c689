//! HTTP API
//!
//! Thin axum layer over the dispatcher. Routes live under `/api/v1`,
//! events stream from `/api/v1/events`, and `/health` reports liveness.

pub mod error;
pub mod handlers;
pub mod sse;

pub use error::{ApiError, ApiResult};

use crate::dispatch::Dispatcher;
use crate::scheduler::Scheduler;
use axum::{
    routing::{get, post, put},
    Router,
};
use partyq_common::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub dispatcher: Arc<Dispatcher>,
    /// Read only: handlers report its state, never drive it
    pub scheduler: Arc<Scheduler>,
    pub events: EventBus,
    pub backend_name: &'static str,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

/// Build the router with every route and middleware attached
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/session", post(handlers::generate_session))
        .route("/api/v1/tracks", get(handlers::query_tracks))
        .route("/api/v1/queue", get(handlers::get_current_queues))
        .route(
            "/api/v1/queue/track",
            post(handlers::add_track_to_queue)
                .put(handlers::move_track)
                .delete(handlers::remove_track),
        )
        .route("/api/v1/track/vote", put(handlers::vote_track))
        .route("/api/v1/player/control", put(handlers::control_player))
        .route("/api/v1/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
