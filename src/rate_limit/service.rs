use super::distributed::DistributedRateLimiter;
use super::limiter::Limiter;
use super::local::LocalRateLimiter;
use super::redis::RedisWindowStore;
use crate::config::{LimiterBackend, RateLimitingConfig};
use crate::error::{GatewayError, Result};
use std::sync::Arc;
use tracing::info;

/// Build the limiter selected by the configuration.
///
/// A Redis backend connects eagerly: an unreachable store is a startup
/// error rather than a silent switch to local counting.
pub async fn build_limiter(config: &RateLimitingConfig) -> Result<Arc<dyn Limiter>> {
    let policy = config.limit.policy()?;

    match config.backend {
        LimiterBackend::Local => {
            info!(
                limit = policy.limit(),
                window_secs = policy.window().as_secs(),
                "Initializing local rate limiter"
            );
            let limiter = Arc::new(LocalRateLimiter::new(policy));
            limiter.spawn_janitor(config.sweep_interval());
            Ok(limiter)
        }
        LimiterBackend::Redis => {
            let redis = config.redis.as_ref().ok_or_else(|| {
                GatewayError::Config(
                    "rate_limiting.redis is required for the redis backend".to_string(),
                )
            })?;

            info!(
                limit = policy.limit(),
                window_secs = policy.window().as_secs(),
                "Initializing rate limiter with Redis backend"
            );

            let store = RedisWindowStore::connect(&redis.url, redis.connect_timeout()).await?;
            let limiter = DistributedRateLimiter::new(Arc::new(store), policy)
                .with_key_prefix(redis.key_prefix.clone())
                .with_command_timeout(redis.command_timeout());
            Ok(Arc::new(limiter))
        }
    }
}
