//! evalsrv-api — the Request Handler's axum surface.
//!
//! One small `Clone` state struct carried by every handler, one function
//! that assembles the whole `Router`. This service only ever needs the
//! built-in [`evalsrv_runtime::DefaultExtensions`] guest surface, so the
//! router is concrete rather than generic over `GuestExtensions`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use evalsrv_core::Config;
use evalsrv_queue::AdmissionQueue;
use evalsrv_runtime::DefaultExtensions;

/// Shared state for every `/eval`, `/healthz`, `/readyz` handler.
#[derive(Clone)]
pub struct ApiState {
    pub queue: AdmissionQueue<DefaultExtensions>,
    pub auth_secret: Arc<str>,
}

/// Build the complete router: `POST /eval`, `GET /healthz`, `GET /readyz`.
pub fn build_router(queue: AdmissionQueue<DefaultExtensions>, config: &Config) -> Router {
    let state = ApiState {
        queue,
        auth_secret: Arc::from(config.auth_secret.as_str()),
    };

    Router::new()
        .route("/eval", post(handlers::eval))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
}
