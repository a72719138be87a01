// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the daemon HTTP API.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{Level, event};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request id
// ---------------------------------------------------------------------------

/// Per-request identifier, available as an extension and echoed in the
/// `X-Request-Id` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generate a [`RequestId`] for each request.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

// ---------------------------------------------------------------------------
// Request logger
// ---------------------------------------------------------------------------

/// Log method, path, status, and duration per request.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    event!(
        target: "skillport.http",
        Level::INFO,
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}

// ---------------------------------------------------------------------------
// API-key authentication
// ---------------------------------------------------------------------------

/// Reject requests without a valid API key when authentication is enabled.
///
/// `GET /health` is routed outside this layer so probes stay unauthenticated.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.auth_required {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(state.auth_header.as_str())
        .and_then(|v| v.to_str().ok());
    let authorized =
        presented.is_some_and(|key| state.api_keys.iter().any(|known| known == key));

    if !authorized {
        let body = axum::Json(json!({
            "status": "error",
            "message": "missing or invalid API key",
            "error": {"code": "UNAUTHORIZED", "details": {"header": state.auth_header.clone()}},
        }));
        return (StatusCode::UNAUTHORIZED, body).into_response();
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

struct RateWindow {
    opened: Instant,
    served: u32,
}

/// Fixed-window request limiter, wired into the API routes when
/// `RATE_LIMIT_PER_MINUTE` is configured.
///
/// The counter resets when the window rolls over; a refused request learns
/// how long until that happens via the `Retry-After` header.
#[derive(Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<RateWindow>>,
    max_requests: u32,
    period: Duration,
}

impl RateLimiter {
    /// Allow `max_requests` per minute.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Allow `max_requests` per `period`.
    #[must_use]
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(RateWindow {
                opened: Instant::now(),
                served: 0,
            })),
            max_requests,
            period,
        }
    }

    /// Admit one request, or report how long until the window rolls over.
    pub fn admit(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut window = self.window.lock().expect("rate window lock poisoned");

        let age = now.duration_since(window.opened);
        if age >= self.period {
            window.opened = now;
            window.served = 0;
        }
        if window.served >= self.max_requests {
            return Err(self.period.saturating_sub(age));
        }
        window.served += 1;
        Ok(())
    }

    /// Axum middleware wrapper around [`admit`](Self::admit).
    pub async fn middleware(
        State(limiter): State<RateLimiter>,
        req: Request,
        next: Next,
    ) -> Response {
        match limiter.admit() {
            Ok(()) => next.run(req).await,
            Err(retry_after) => {
                let secs = retry_after.as_secs().max(1);
                let body = axum::Json(json!({
                    "status": "error",
                    "message": "rate limit exceeded",
                    "error": {"code": "RATE_LIMITED", "details": {"retry_after_seconds": secs}},
                }));
                let mut resp = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    resp.headers_mut().insert(header::RETRY_AFTER, value);
                }
                resp
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

/// Build the CORS layer for the configured origins.
///
/// The method set is fixed to what the API actually serves, and the allowed
/// request headers are the JSON content type plus the API-key header. An
/// origin of `*` opens the API to any origin.
#[must_use]
pub fn cors_layer(allowed_origins: &[String], auth_header: &str) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let mut headers = vec![header::CONTENT_TYPE];
    if let Ok(name) = HeaderName::from_bytes(auth_header.as_bytes()) {
        headers.push(name);
    }

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_refuses_once_the_window_is_spent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.admit().is_ok());
        assert!(limiter.admit().is_ok());
        let retry_after = limiter.admit().unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn rate_limiter_resets_when_the_window_rolls_over() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.admit().is_ok());
        assert!(limiter.admit().is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.admit().is_ok());
    }

    #[test]
    fn rate_limiter_clones_share_one_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let clone = limiter.clone();
        assert!(limiter.admit().is_ok());
        assert!(clone.admit().is_err());
    }

    #[test]
    fn cors_layer_accepts_origin_lists_and_wildcard() {
        let _restricted = cors_layer(
            &["https://app.example.com".to_string()],
            "X-API-Key",
        );
        let _open = cors_layer(&["*".to_string()], "X-API-Key");
    }
}
