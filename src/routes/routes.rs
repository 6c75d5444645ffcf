//! Operational HTTP surface.
//!
//! - `GET /healthz` -> liveness
//! - `GET /readyz` -> registry, local tier and remote tier checks
//! - `GET /objects/{contenthash}` -> recorded vs. observed location of one object
//!
//! Objects are moved by the batch runner, never through HTTP.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    object_handlers::get_object_status,
};
use axum::{Router, routing::get};

/// Build the router. The caller supplies the state with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects/{contenthash}", get(get_object_status))
}
