//! Wire types shared between the Request Handler, Admission Queue, and
//! Isolate Runner.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The body of `POST /eval`.
///
/// `msg` is treated as opaque JSON by every component except the Code
/// Shaper (which sanitizes it) and [`PotatContext::from_msg`] (which reads
/// a handful of well-known sub-fields). Missing sub-fields are tolerated.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalRequest {
    pub code: String,
    #[serde(default = "Value::default")]
    pub msg: Value,
}

/// Per-request identity payload forwarded to outbound HTTP as the
/// `x-potat-data` header, and available to the guest as (a field of) `msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Value>,
    pub id: String,
    pub timestamp: i64,
    pub platform: String,
    #[serde(rename = "isSilent")]
    pub is_silent: bool,
}

impl PotatContext {
    /// Derive a `PotatContext` from the request's `msg`, filling in the
    /// documented defaults for any field that is absent or the wrong shape.
    pub fn from_msg(msg: &Value) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Self {
            user: msg.get("user").cloned(),
            channel: msg.get("channel").cloned(),
            id: msg
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_default(),
            timestamp: msg
                .get("timestamp")
                .and_then(Value::as_i64)
                .unwrap_or(now_ms),
            platform: msg
                .get("platform")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| "PotatEval".to_string()),
            is_silent: msg
                .get("isSilent")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// A single error entry inside an [`EvalEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The JSON envelope returned by `POST /eval`.
#[derive(Debug, Clone, Serialize)]
pub struct EvalEnvelope {
    pub data: Vec<String>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorMessage>>,
}

impl EvalEnvelope {
    pub fn success(result: String, duration_ms: f64) -> Self {
        Self {
            data: vec![result],
            status_code: 200,
            duration: round4(duration_ms),
            errors: None,
        }
    }

    pub fn auth_failed(duration_ms: f64) -> Self {
        Self {
            data: vec![],
            status_code: 418,
            duration: round4(duration_ms),
            errors: Some(vec![ErrorMessage::new(
                "not today my little bish xqcL",
            )]),
        }
    }

    pub fn internal_error(duration_ms: f64) -> Self {
        Self {
            data: vec![],
            status_code: 500,
            duration: round4(duration_ms),
            errors: Some(vec![ErrorMessage::new("Internal server error")]),
        }
    }
}

/// Round to 4 decimal places, matching the documented `duration` precision.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
