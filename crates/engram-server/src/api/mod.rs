//! REST API Facade
//!
//! Thin layer over the core engines: validates requests, builds context,
//! delegates, and wraps responses in the standard envelope. All routes
//! live under `/api/v1`; the MCP-style tool surface is mounted at `/mcp`.

pub mod envelope;
pub mod memory;
pub mod reasoning;
pub mod think;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Build the full application router.
pub fn router(state: SharedState) -> Router {
    let v1 = Router::new()
        .route("/think", post(think::think))
        .route("/think/status/{session_id}", get(think::status))
        .route("/reasoning/parallel", post(reasoning::parallel))
        .route(
            "/reasoning/parallel/{session_id}/stream",
            get(reasoning::session_stream),
        )
        .route("/reasoning/live/{stream_id}", get(reasoning::live_stream))
        .route("/reasoning/chain/{session_id}", get(reasoning::chain))
        .route("/memory", post(memory::create))
        .route("/memory/search", get(memory::search))
        .route("/memory/health", get(memory::health))
        .route("/memory/maintenance", post(memory::maintenance))
        .route("/memory/prune", post(memory::prune))
        .route("/memory/archive", post(memory::archive))
        .route("/memory/archive/search", get(memory::archive_search))
        .route("/memory/archive/restore", post(memory::archive_restore))
        .route("/memory/archive/stats", get(memory::archive_stats))
        .route("/memory/{id}", get(memory::retrieve))
        .route(
            "/config/decay",
            get(memory::decay_config).put(memory::update_decay_config),
        )
        .route("/consolidation/trigger", post(memory::trigger_consolidation))
        .route(
            "/consolidation/progress",
            get(memory::consolidation_progress),
        );

    Router::new()
        .nest("/api/v1", v1)
        .route("/mcp", post(crate::mcp::handle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
