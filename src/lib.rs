//! depot: a Galaxy-compatible collection registry over a generic content
//! store, optionally federating reads to an upstream Galaxy server.
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → log_exchange → DefaultBodyLimit → Handler
//! ```

pub mod auth;
pub mod error;
pub mod extract;
pub mod logging;
pub mod routes;
pub mod state;

use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use tower_http::trace::TraceLayer;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    routes::router()
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes()))
        .layer(from_fn_with_state(state.clone(), logging::log_exchange))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
