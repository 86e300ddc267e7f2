//! Request Handler — `POST /eval`, `GET /healthz`, `GET /readyz` (spec §4.6).
//!
//! One `async fn` per route, `State(..)` extraction, `impl IntoResponse`
//! returns. The response body is the fixed `EvalEnvelope` shape rather
//! than a generic `ApiResponse<T>` wrapper, since the wire format here is
//! part of the system's external contract.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::{error, trace};

use evalsrv_core::{EvalEnvelope, EvalRequest};

use crate::ApiState;
use crate::auth::{constant_time_eq_5, extract_bearer};

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn status_for(envelope: &EvalEnvelope) -> StatusCode {
    StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `POST /eval` (spec §4.6, §6).
pub async fn eval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<EvalRequest>,
) -> impl IntoResponse {
    let started = Instant::now();

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(|token| constant_time_eq_5(token, &state.auth_secret))
        .unwrap_or(false);

    if !authorized {
        let envelope = EvalEnvelope::auth_failed(elapsed_ms(started));
        return (status_for(&envelope), Json(envelope));
    }

    let code_len = request.code.len();
    match state.queue.enqueue(request.code, request.msg).await {
        Ok(result) => {
            let envelope = EvalEnvelope::success(result, elapsed_ms(started));
            (status_for(&envelope), Json(envelope))
        }
        Err(err) => {
            error!(error = %err, code_len, "eval request failed");
            let envelope = EvalEnvelope::internal_error(elapsed_ms(started));
            (status_for(&envelope), Json(envelope))
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// `GET /healthz` — process liveness, no dependency on the queue.
pub async fn healthz() -> impl IntoResponse {
    trace!("healthz probe");
    (StatusCode::OK, Json(HealthBody { status: "ok" }))
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    #[serde(rename = "queueDepth")]
    queue_depth: usize,
}

/// `GET /readyz` — readiness, reflecting Admission Queue backpressure.
pub async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    let depth = state.queue.depth();
    trace!(depth, capacity = state.queue.capacity(), "readyz probe");
    if depth < state.queue.capacity() {
        (
            StatusCode::OK,
            Json(ReadyBody {
                status: "ready",
                queue_depth: depth,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "not_ready",
                queue_depth: depth,
            }),
        )
    }
}
