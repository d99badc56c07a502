//! Login attempt status endpoint
//!
//! `GET /api/login-attempts` reports the throttle decision for the caller so
//! the client can render "attempt N of M" or a countdown. It is read-only:
//! nothing is appended and nothing is cached between requests.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::audit::ANONYMOUS_IDENTITY;
use crate::state::AppState;
use crate::throttle::ThrottleDecision;

/// Cookie holding the browser-scoped attempt token
pub const ATTEMPT_TOKEN_COOKIE: &str = "login_attempt_token";

/// Query parameters of the status endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Identity the client is about to log in as
    pub email: Option<String>,
}

/// Body of `GET /api/login-attempts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAttemptStatus {
    /// Whether the next attempt would be rejected
    pub blocked: bool,
    /// Failures counted inside the window
    pub attempts: u32,
    /// Failures that block the identity
    pub threshold: u32,
    /// Seconds until attempts are admitted again; `null` when not blocked
    pub retry_after_seconds: Option<u64>,
}

impl From<&ThrottleDecision> for LoginAttemptStatus {
    fn from(decision: &ThrottleDecision) -> Self {
        Self {
            blocked: decision.blocked,
            attempts: decision.window_count,
            threshold: decision.threshold,
            retry_after_seconds: if decision.blocked {
                decision.retry_after_secs()
            } else {
                None
            },
        }
    }
}

/// Current throttle status for the caller
pub async fn login_attempts(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> Json<LoginAttemptStatus> {
    let identity = resolve_identity(&query, &headers);
    let decision = state.gate().evaluate(&identity).await;
    Json(LoginAttemptStatus::from(&decision))
}

/// Identity for a status request: the `email` parameter, else the
/// browser-scoped attempt token, else `anonymous`
fn resolve_identity(query: &StatusQuery, headers: &HeaderMap) -> String {
    if let Some(email) = query.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        return email.to_string();
    }
    match extract_attempt_token(headers) {
        Some(token) => format!("browser:{}", token),
        None => ANONYMOUS_IDENTITY.to_string(),
    }
}

fn extract_attempt_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let Some(val) = parts.next().map(str::trim) else {
            continue;
        };
        if key == ATTEMPT_TOKEN_COOKIE && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLogStore, AuthEvent, AuthEventKind, MemoryAuditLog};
    use crate::clock::MockClock;
    use crate::config::Config;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get, Router};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 14, 0, 0).unwrap()
    }

    fn app(store: Arc<MemoryAuditLog>, clock: &MockClock) -> Router {
        let state = AppState::new(Config::default(), store, Arc::new(clock.clone()));
        Router::new()
            .route("/api/login-attempts", get(login_attempts))
            .with_state(state)
    }

    async fn seed_failures(store: &MemoryAuditLog, identity: &str, n: i64) {
        for i in 0..n {
            store
                .append(&AuthEvent::new(
                    AuthEventKind::LoginFailed,
                    identity,
                    t0() + Duration::seconds(i),
                ))
                .await
                .unwrap();
        }
    }

    async fn get_status(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_for_unknown_identity() {
        let store = Arc::new(MemoryAuditLog::new());
        let clock = MockClock::new(t0());
        let request = Request::get("/api/login-attempts?email=new@example.com")
            .body(Body::empty())
            .unwrap();

        let (status, body) = get_status(app(store, &clock), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "blocked": false,
                "attempts": 0,
                "threshold": 5,
                "retryAfterSeconds": null,
            })
        );
    }

    #[tokio::test]
    async fn test_status_for_blocked_identity_is_read_only() {
        let store = Arc::new(MemoryAuditLog::new());
        seed_failures(&store, "alice@example.com", 5).await;
        let clock = MockClock::new(t0() + Duration::minutes(10));
        let before = store.len();

        let request = Request::get("/api/login-attempts?email=Alice%40Example.com")
            .body(Body::empty())
            .unwrap();
        let (_, body) = get_status(app(store.clone(), &clock), request).await;

        assert_eq!(body["blocked"], true);
        assert_eq!(body["attempts"], 5);
        assert_eq!(body["retryAfterSeconds"], 300);
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn test_status_uses_attempt_token_cookie() {
        let store = Arc::new(MemoryAuditLog::new());
        seed_failures(&store, "browser:tok123", 2).await;
        let clock = MockClock::new(t0());

        let request = Request::get("/api/login-attempts")
            .header("cookie", "theme=dark; login_attempt_token=tok123")
            .body(Body::empty())
            .unwrap();
        let (_, body) = get_status(app(store, &clock), request).await;
        assert_eq!(body["attempts"], 2);
        assert_eq!(body["blocked"], false);
    }

    #[tokio::test]
    async fn test_status_without_identity_is_anonymous() {
        let store = Arc::new(MemoryAuditLog::new());
        seed_failures(&store, "", 1).await;
        let clock = MockClock::new(t0());

        let request = Request::get("/api/login-attempts?email=")
            .body(Body::empty())
            .unwrap();
        let (_, body) = get_status(app(store, &clock), request).await;
        assert_eq!(body["attempts"], 1);
    }

    #[test]
    fn test_extract_attempt_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "flag; login_attempt_token=abc; other=1".parse().unwrap(),
        );
        assert_eq!(extract_attempt_token(&headers), Some("abc".to_string()));

        headers.insert(axum::http::header::COOKIE, "login_attempt_token=".parse().unwrap());
        assert_eq!(extract_attempt_token(&headers), None);
    }
}
