//! HTTP server with graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::Request, routing::get, Router};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    error::Result,
    handlers, health,
    retention::RetentionPruner,
    state::AppState,
};

/// Path of the login attempt status endpoint
pub const STATUS_PATH: &str = "/api/login-attempts";

/// Generates time-sortable request IDs
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        let header_value = http::HeaderValue::from_str(&id).ok()?;
        Some(RequestId::new(header_value))
    }
}

/// Server instance
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server instance
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Get the application state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Routes with the full middleware stack
    pub fn router(&self) -> Router {
        let config = self.state.config();
        let sensitive: Arc<[http::HeaderName]> =
            Arc::from(vec![http::header::AUTHORIZATION, http::header::COOKIE]);

        // Layers are applied in reverse order (bottom layer is innermost)
        Router::new()
            .route("/health", get(health::health))
            .route("/ready", get(health::readiness))
            .route(STATUS_PATH, get(handlers::login_attempts))
            .with_state(self.state.clone())
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.service.timeout_secs),
            ))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(SetSensitiveRequestHeadersLayer::from_shared(sensitive))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
            .layer(CatchPanicLayer::new())
    }

    /// Run the server until SIGINT or SIGTERM
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config().service.port));
        let listener = TcpListener::bind(&addr).await?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Run the server on `listener` until `shutdown` resolves
    ///
    /// The retention pruner runs alongside the server when enabled and is
    /// stopped once in-flight requests have drained.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.state.config();
        let addr = listener.local_addr()?;

        tracing::info!(
            "Starting {} on {} ({} audit store)",
            config.service.name,
            addr,
            self.state.store().backend()
        );
        tracing::info!(
            threshold = config.throttle.threshold,
            window_minutes = config.throttle.window_minutes,
            retention_days = config.retention.retention_days,
            enabled = config.throttle.enabled,
            "Login throttle configured"
        );

        let pruner_shutdown = CancellationToken::new();
        let pruner = config.retention.enabled.then(|| {
            RetentionPruner::new(
                config.retention.clone(),
                self.state.store().clone(),
                self.state.clock().clone(),
                config.instance_id(),
            )
            .with_health(self.state.health().clone())
            .spawn(pruner_shutdown.clone())
        });

        let app = self.router();
        tracing::info!("Server listening on {}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        pruner_shutdown.cancel();
        if let Some(handle) = pruner {
            if let Err(e) = handle.await {
                tracing::warn!("Retention pruner task ended abnormally: {}", e);
            }
        }

        served?;
        tracing::info!("Server shutdown complete");

        Ok(())
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use axum::body::Body;
    use tower::ServiceExt;

    fn server() -> Server {
        let state = AppState::new(
            Config::default(),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(SystemClock),
        );
        Server::new(state)
    }

    #[tokio::test]
    async fn test_router_serves_status_with_request_id() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/api/login-attempts?email=a@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_propagated() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "trace-me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "trace-me");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server()
            .serve_with_shutdown(listener, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
            .await;
        assert!(result.is_ok());
    }
}
