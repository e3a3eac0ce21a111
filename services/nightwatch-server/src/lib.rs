//! Library half of the Night Watch server: the axum router and shared
//! state live here so both the `nightwatch-server` binary and the
//! integration tests under `tests/` can construct the same app without
//! duplicating wiring. `main.rs` stays a thin entry point over this crate.

pub mod http;
pub mod predictor_adapter;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Assembles the full `/ws` + REST + `/health` surface with the same
/// CORS/trace layering `main.rs` used to build inline.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .merge(http::router())
        .route("/health", axum::routing::get(http::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
