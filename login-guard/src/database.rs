//! PostgreSQL connection pool for the audit log

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::DatabaseConfig,
    error::{Error, Result, StoreError},
};

/// Create a PostgreSQL connection pool, retrying with exponential backoff
pub(crate) async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Audit database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Audit database pool created: max={}, min={}",
                        config.max_connections,
                        config.min_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to audit database after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "Audit database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| {
            Error::Store(StoreError::Unavailable(format!(
                "cannot connect to '{}' ({}): {}",
                sanitize_connection_url(&config.url),
                categorize_db_error(&e),
                e
            )))
        })
}

/// Mask the password in a connection URL for logging
fn sanitize_connection_url(url: &str) -> String {
    let (Some(scheme_end), Some(at_pos)) = (url.find("://"), url.rfind('@')) else {
        return url.to_string();
    };
    let credentials_start = scheme_end + 3;
    if at_pos < credentials_start {
        return url.to_string();
    }
    match url[credentials_start..at_pos].find(':') {
        Some(colon) => format!(
            "{}:***{}",
            &url[..credentials_start + colon],
            &url[at_pos..]
        ),
        None => url.to_string(),
    }
}

fn categorize_db_error(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::Configuration(_) => "configuration error",
        sqlx::Error::Database(_) => "database error",
        sqlx::Error::Io(_) => "network I/O error",
        sqlx::Error::Tls(_) => "TLS error",
        sqlx::Error::PoolTimedOut => "pool timed out",
        sqlx::Error::PoolClosed => "pool closed",
        _ => "connection error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_connection_url() {
        assert_eq!(
            sanitize_connection_url("postgres://audit:s3cret@db:5432/auth"),
            "postgres://audit:***@db:5432/auth"
        );
        assert_eq!(
            sanitize_connection_url("postgres://db:5432/auth"),
            "postgres://db:5432/auth"
        );
        assert_eq!(
            sanitize_connection_url("postgres://audit@db/auth"),
            "postgres://audit@db/auth"
        );
    }

    #[tokio::test]
    async fn test_unreachable_database_is_a_store_error() {
        let config = DatabaseConfig {
            url: "postgres://audit:pw@127.0.0.1:1/auth".to_string(),
            max_connections: 1,
            min_connections: 0,
            connection_timeout_secs: 1,
            max_retries: 0,
            retry_delay_secs: 0,
        };

        let err = create_pool(&config).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
        assert!(!err.to_string().contains("pw@"));
    }
}
