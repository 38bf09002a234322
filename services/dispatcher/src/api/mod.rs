//! HTTP API handlers and routing.

mod dispatch;
pub mod error;
mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use dispatch::{DispatchRequest, DispatchResponse};

/// Create the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(dispatch::routes())
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
