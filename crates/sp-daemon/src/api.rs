// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire envelope and request payloads for the daemon API.
//!
//! Every response carries a top-level `status` of `"success"` or `"error"`;
//! error bodies add `message` plus `error.{code, details}`, with the HTTP
//! status derived from the stable error code. Success shapes are
//! per-endpoint and intentionally not normalised.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sp_error::SkillError;

/// Wrap a success payload in the envelope.
///
/// `payload` must be a JSON object; its fields are merged next to
/// `"status": "success"`.
#[must_use]
pub fn success(payload: Value) -> Json<Value> {
    let mut envelope = serde_json::Map::new();
    envelope.insert("status".into(), json!("success"));
    if let Value::Object(fields) = payload {
        envelope.extend(fields);
    }
    Json(Value::Object(envelope))
}

/// A [`SkillError`] leaving the process as an HTTP response.
#[derive(Debug)]
pub struct ApiFailure(pub SkillError);

impl From<SkillError> for ApiFailure {
    fn from(error: SkillError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = StatusCode::from_u16(error.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Internal errors keep their diagnostics in the log, not the body.
        let message = if error.is_internal() {
            "internal server error".to_string()
        } else {
            error.message.clone()
        };
        let body = json!({
            "status": "error",
            "message": message,
            "error": {
                "code": error.code,
                "details": error.details,
            },
        });
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /skill/invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Skill to invoke; the latest version is resolved.
    pub skill_id: String,
    /// Inputs payload; `null` or absent means an empty object.
    #[serde(default)]
    pub inputs: Value,
    /// Caller timeout in seconds, combined with the skill's own limit by
    /// taking the minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// When `true`, return immediately with an execution id.
    #[serde(rename = "async", default)]
    pub run_async: bool,
}

/// Query parameters of `GET /skill/{skill_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailQuery {
    /// Specific version to fetch; latest when absent.
    pub version: Option<String>,
}
