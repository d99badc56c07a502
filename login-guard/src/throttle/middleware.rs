//! Throttle middleware for login routes
//!
//! Enforces the gate around a login handler without changes to the handler
//! itself. The identity is taken from the JSON request body, the outcome
//! from the handler's response status.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};

use super::gate::ThrottleGate;
use crate::audit::ANONYMOUS_IDENTITY;
use crate::error::Error;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Middleware state for automatic throttle enforcement
///
/// Wraps a [`ThrottleGate`] and the JSON field name that carries the
/// identity. Apply to login routes using `axum::middleware::from_fn_with_state`.
///
/// # Behavior
///
/// 1. Buffers the request body and extracts the identity from the specified JSON field
/// 2. If the content is not JSON, the request passes through without enforcement
/// 3. A JSON body without the field is evaluated as `anonymous`
/// 4. If the identity is blocked, returns HTTP 429 with a `Retry-After` header
/// 5. Forwards the request to the inner handler
/// 6. A 401 response records a failure, a 2xx response records a success
///
/// # Example
///
/// ```rust,ignore
/// use login_guard::throttle::{LoginThrottleMiddleware, ThrottleGate};
///
/// let mw = LoginThrottleMiddleware::new(gate, "email");
///
/// let app = Router::new()
///     .route("/login", post(login_handler))
///     .route_layer(axum::middleware::from_fn_with_state(
///         mw,
///         LoginThrottleMiddleware::middleware,
///     ));
/// ```
#[derive(Clone)]
pub struct LoginThrottleMiddleware {
    gate: ThrottleGate,
    identity_field: String,
}

impl LoginThrottleMiddleware {
    /// Create a new throttle middleware
    ///
    /// `identity_field` is the JSON field name to extract from the request
    /// body (e.g., `"email"`, `"username"`).
    pub fn new(gate: ThrottleGate, identity_field: &str) -> Self {
        Self {
            gate,
            identity_field: identity_field.to_string(),
        }
    }

    /// Middleware function for axum
    ///
    /// Use with `axum::middleware::from_fn_with_state`.
    pub async fn middleware(
        State(mw): State<Self>,
        request: Request<Body>,
        next: Next,
    ) -> Result<Response, Error> {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        if !is_json {
            return Ok(next.run(request).await);
        }

        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| Error::BadRequest(format!("Failed to read request body: {}", e)))?;

        let identity = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| v.get(&mw.identity_field).cloned())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let metadata = json!({
            "path": parts.uri.path(),
            "user_agent": user_agent,
        });

        let decision = mw.gate.admit(&identity, metadata.clone()).await;
        if decision.blocked {
            return Ok(Error::Throttled {
                retry_after_secs: decision.retry_after_secs().unwrap_or(1),
            }
            .into_response());
        }

        let request = Request::from_parts(parts, Body::from(bytes));
        let response = next.run(request).await;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            mw.gate.record_failure(&identity, metadata).await;
        } else if status.is_success() {
            mw.gate.record_success(&identity, metadata).await;
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLogStore, AuthEventKind, MemoryAuditLog};
    use crate::clock::MockClock;
    use crate::throttle::ThrottleConfig;
    use axum::{routing::post, Json, Router};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn login(Json(body): Json<Value>) -> StatusCode {
        if body.get("password").and_then(Value::as_str) == Some("correct") {
            StatusCode::OK
        } else {
            StatusCode::UNAUTHORIZED
        }
    }

    fn app(store: Arc<MemoryAuditLog>) -> Router {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap());
        let gate = ThrottleGate::new(ThrottleConfig::new(2, 15), store, Arc::new(clock));
        let mw = LoginThrottleMiddleware::new(gate, "email");

        Router::new()
            .route("/login", post(login))
            .route_layer(axum::middleware::from_fn_with_state(
                mw,
                LoginThrottleMiddleware::middleware,
            ))
    }

    fn attempt(password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "Mallory@Example.com", "password": password }).to_string(),
            ))
            .unwrap()
    }

    async fn kinds(store: &MemoryAuditLog) -> Vec<AuthEventKind> {
        store
            .query("mallory@example.com", DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    #[tokio::test]
    async fn test_outcomes_are_recorded_from_status() {
        let store = Arc::new(MemoryAuditLog::new());
        let app = app(store.clone());

        let response = app.clone().oneshot(attempt("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.oneshot(attempt("correct")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            kinds(&store).await,
            vec![AuthEventKind::LoginFailed, AuthEventKind::LoginSuccess]
        );
    }

    #[tokio::test]
    async fn test_blocked_identity_gets_429_with_retry_after() {
        let store = Arc::new(MemoryAuditLog::new());
        let app = app(store.clone());

        for _ in 0..2 {
            app.clone().oneshot(attempt("wrong")).await.unwrap();
        }
        let response = app.oneshot(attempt("correct")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "900"
        );
        // The blocked attempt never reached the handler
        assert!(!kinds(&store).await.contains(&AuthEventKind::LoginSuccess));
    }

    #[tokio::test]
    async fn test_non_json_passes_through() {
        let store = Arc::new(MemoryAuditLog::new());
        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("email=x"))
            .unwrap();

        let response = app(store.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(store.is_empty());
    }
}
