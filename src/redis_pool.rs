//! Redis connection pool construction with retry.

use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Create a Redis connection pool, retrying with exponential backoff.
pub async fn create_pool(config: &CacheConfig) -> Result<Pool> {
    create_pool_with_retries(config, config.max_retries).await
}

async fn create_pool_with_retries(config: &CacheConfig, max_retries: u32) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(target: "cache", "redis connection established after {} attempt(s)", attempt + 1);
                } else {
                    tracing::info!(target: "cache", "redis connection pool created: max_connections={}", config.max_connections);
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    tracing::error!(target: "cache", "failed to connect to redis after {} attempts: {}", max_retries + 1, e);
                    return Err(e);
                }

                let delay_multiplier = 2_u32.pow(attempt.saturating_sub(1));
                let delay = base_delay * delay_multiplier;
                tracing::warn!(target: "cache", "redis connection attempt {} failed: {}. retrying in {:?}", attempt, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(config: &CacheConfig) -> Result<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.redis_url);

    let pool = cfg
        .builder()
        .map_err(|e| Error::Internal(format!("failed to build redis pool: {e}")))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Internal(format!("failed to create redis pool: {e}")))?;

    let conn = pool
        .get()
        .await
        .map_err(|e| Error::Internal(format!("failed to get redis connection: {e}")))?;
    drop(conn);

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults_feed_pool_sizing() {
        let config = CacheConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.max_retries, 5);
    }
}
