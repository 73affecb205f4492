use super::store::{WindowSnapshot, WindowStore, WindowTransaction};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed ledger store.
///
/// Each client key is a sorted set of attempt tokens scored by their Unix
/// millisecond timestamp. Updates run as a single `MULTI`/`EXEC` pipeline,
/// one round trip per check.
#[derive(Clone)]
pub struct RedisWindowStore {
    /// Redis connection manager (reconnects on its own, cheap to clone)
    connection: ConnectionManager,
}

impl RedisWindowStore {
    /// Connect and verify the server answers `PING` within `timeout`
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| GatewayError::Config(format!("Invalid Redis URL: {}", e)))?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                GatewayError::RateLimitBackend(format!(
                    "Timed out connecting to Redis after {:?}",
                    timeout
                ))
            })?
            .map_err(|e| {
                GatewayError::RateLimitBackend(format!("Failed to connect to Redis: {}", e))
            })?;

        let store = Self { connection };

        tokio::time::timeout(timeout, store.ping())
            .await
            .map_err(|_| {
                GatewayError::RateLimitBackend(format!(
                    "Redis PING timed out after {:?}",
                    timeout
                ))
            })??;

        info!("Connected to Redis rate limit store");
        Ok(store)
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn record_and_count(&self, tx: &WindowTransaction) -> Result<WindowSnapshot> {
        let mut connection = self.connection.clone();

        // Negative ranks count from the highest score, so this reads the
        // limit-th newest member.
        let rank = -(tx.limit.max(1) as isize);
        let ttl_ms = i64::try_from(tx.ttl.as_millis()).unwrap_or(i64::MAX);

        let (count, boundary): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .zadd(&tx.key, &tx.member, tx.score_ms)
            .ignore()
            .zrembyscore(&tx.key, "-inf", tx.evict_through_ms)
            .ignore()
            .zcard(&tx.key)
            .zrange_withscores(&tx.key, rank, rank)
            .pexpire(&tx.key, ttl_ms)
            .ignore()
            .query_async(&mut connection)
            .await
            .map_err(|e| GatewayError::RateLimitBackend(format!("Redis transaction failed: {}", e)))?;

        debug!(key = %tx.key, count, "Redis window transaction committed");

        Ok(WindowSnapshot {
            count,
            boundary_ms: boundary.first().map(|(_, score)| *score as i64),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await
            .map_err(|e| GatewayError::RateLimitBackend(format!("Redis PING failed: {}", e)))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
