//! Redis connection pool for the audit log

use std::time::Duration;

use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};

use crate::{
    config::RedisConfig,
    error::{Error, Result, StoreError},
};

/// Create a Redis connection pool, retrying with exponential backoff
pub(crate) async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Redis connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Redis connection pool created: max_connections={}",
                        config.max_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to Redis after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "Redis connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Build the pool and check out one connection to prove it works
async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let unavailable = |what: &str, e: &dyn std::fmt::Display| {
        Error::Store(StoreError::Unavailable(format!("{}: {}", what, e)))
    };

    let pool = DeadpoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| unavailable("failed to build Redis pool", &e))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| unavailable("failed to create Redis pool", &e))?;

    drop(
        pool.get()
            .await
            .map_err(|e| unavailable("failed to get Redis connection", &e))?,
    );

    Ok(pool)
}
