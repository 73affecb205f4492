use super::clock::{Clock, SystemClock};
use super::limiter::Limiter;
use super::store::{WindowStore, WindowTransaction};
use super::types::{RateLimitPolicy, RateLimitResult};
use crate::error::{GatewayError, Result};
use crate::metrics;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default prefix for ledger keys in the shared store
pub const DEFAULT_KEY_PREFIX: &str = "rate_limiter:";

/// Default bound on a single store transaction
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sliding window rate limiter whose ledgers live in a shared store, so
/// every gateway instance sees the same counts.
///
/// Per-key linearizability comes from the store's atomic transaction; the
/// limiter itself holds no lock across the store call.
pub struct DistributedRateLimiter {
    store: Arc<dyn WindowStore>,
    policy: RwLock<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    command_timeout: Duration,
}

impl DistributedRateLimiter {
    /// Create a new distributed rate limiter over `store`
    pub fn new(store: Arc<dyn WindowStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy: RwLock::new(policy),
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Read time from `clock` instead of the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Namespace ledger keys under `prefix`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound each store transaction; expiry counts as a backend fault
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Store key holding the ledger of `client_id`
    pub fn ledger_key(&self, client_id: &str) -> String {
        format!("{}{}", self.key_prefix, client_id)
    }

    fn transaction(&self, client_id: &str, policy: &RateLimitPolicy, now: Duration) -> WindowTransaction {
        let now_ms = millis(now);
        WindowTransaction {
            key: self.ledger_key(client_id),
            member: Uuid::new_v4().to_string(),
            score_ms: now_ms,
            // Eviction is inclusive: an entry exactly one window old is gone.
            evict_through_ms: now_ms.saturating_sub(millis(policy.window())),
            limit: policy.limit(),
            ttl: policy.window(),
        }
    }

    fn backend_fault(&self, client_id: &str, policy: &RateLimitPolicy, err: GatewayError) -> RateLimitResult {
        error!(
            store = self.store.name(),
            client_id = %client_id,
            error = %err,
            "Rate limit store failure, denying request"
        );
        metrics::record_rate_limit_backend_error(self.store.name());
        RateLimitResult::unavailable(policy.limit())
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl Limiter for DistributedRateLimiter {
    async fn check(&self, client_id: &str) -> RateLimitResult {
        let policy = *self.policy.read();
        let now = self.clock.now();
        let tx = self.transaction(client_id, &policy, now);

        let snapshot = match tokio::time::timeout(
            self.command_timeout,
            self.store.record_and_count(&tx),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.backend_fault(client_id, &policy, e),
            Err(_) => {
                let err = GatewayError::RateLimitBackend(format!(
                    "transaction timed out after {:?}",
                    self.command_timeout
                ));
                return self.backend_fault(client_id, &policy, err);
            }
        };

        let limit = u64::from(policy.limit());
        if snapshot.count <= limit {
            let remaining = (limit - snapshot.count) as u32;
            debug!(
                key = %tx.key,
                count = snapshot.count,
                remaining,
                "Distributed rate limit check passed"
            );
            RateLimitResult::allowed(policy.limit(), remaining)
        } else {
            let now_ms = tx.score_ms;
            // Once the boundary entry is evicted at most limit - 1 remain
            let boundary_ms = snapshot.boundary_ms.unwrap_or(now_ms);
            let reopens_ms = boundary_ms.saturating_add(millis(policy.window()));
            let retry_after =
                Duration::from_millis(reopens_ms.saturating_sub(now_ms).max(0) as u64);
            debug!(
                key = %tx.key,
                count = snapshot.count,
                retry_after_ms = retry_after.as_millis() as u64,
                "Distributed rate limit exceeded"
            );
            RateLimitResult::limited(policy.limit(), retry_after)
        }
    }

    fn set_rate(&self, limit: u32, window: Duration) -> Result<()> {
        let policy = RateLimitPolicy::new(limit, window)?;
        *self.policy.write() = policy;
        info!(
            store = self.store.name(),
            limit,
            window_ms = window.as_millis() as u64,
            "Distributed rate limit policy updated"
        );
        Ok(())
    }

    fn policy(&self) -> RateLimitPolicy {
        *self.policy.read()
    }

    fn backend(&self) -> &'static str {
        self.store.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::store::{MemoryWindowStore, WindowSnapshot};
    use crate::rate_limit::types::{Outcome, MAX_WINDOW};

    const T0: Duration = Duration::from_secs(1_700_000_000);

    fn limiter(limit: u32, window_secs: u64) -> (DistributedRateLimiter, Arc<MemoryWindowStore>, ManualClock) {
        let clock = ManualClock::new(T0);
        let store = Arc::new(MemoryWindowStore::with_clock(Arc::new(clock.clone())));
        let policy = RateLimitPolicy::new(limit, Duration::from_secs(window_secs)).unwrap();
        let limiter = DistributedRateLimiter::new(store.clone(), policy)
            .with_clock(Arc::new(clock.clone()));
        (limiter, store, clock)
    }

    /// Store that never reaches its backend
    struct UnreachableStore;

    #[async_trait]
    impl WindowStore for UnreachableStore {
        async fn record_and_count(&self, _tx: &WindowTransaction) -> Result<WindowSnapshot> {
            Err(GatewayError::RateLimitBackend("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(GatewayError::RateLimitBackend("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    /// Store that answers after the caller gave up
    struct StalledStore;

    #[async_trait]
    impl WindowStore for StalledStore {
        async fn record_and_count(&self, _tx: &WindowTransaction) -> Result<WindowSnapshot> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(WindowSnapshot {
                count: 1,
                boundary_ms: None,
            })
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_allows_up_to_limit_then_denies() {
        let (limiter, _store, _clock) = limiter(3, 60);

        for expected_remaining in [2, 1, 0] {
            let result = limiter.check("192.168.1.1").await;
            assert!(result.is_allowed());
            assert_eq!(result.remaining, expected_remaining);
        }

        let result = limiter.check("192.168.1.1").await;
        assert_eq!(result.outcome, Outcome::Limited);
        assert_eq!(result.retry_after, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_retry_after_tracks_limit_th_newest_entry() {
        let (limiter, _store, clock) = limiter(2, 60);

        assert!(limiter.allow("A").await);
        clock.set(T0 + Duration::from_secs(10));
        assert!(limiter.allow("A").await);

        clock.set(T0 + Duration::from_secs(20));
        let result = limiter.check("A").await;
        assert_eq!(result.outcome, Outcome::Limited);
        // The t=10 entry is the one that has to leave, not the t=0 one
        let retry_after = result.retry_after.unwrap();
        assert_eq!(retry_after, Duration::from_secs(50));

        clock.set(T0 + Duration::from_secs(20) + retry_after);
        assert!(limiter.allow("A").await);
    }

    #[tokio::test]
    async fn test_longest_window_does_not_overflow() {
        let clock = ManualClock::new(T0);
        let store = Arc::new(MemoryWindowStore::with_clock(Arc::new(clock.clone())));
        let policy = RateLimitPolicy::new(1, MAX_WINDOW).unwrap();
        let limiter = DistributedRateLimiter::new(store, policy).with_clock(Arc::new(clock));

        assert!(limiter.allow("A").await);
        let result = limiter.check("A").await;
        assert_eq!(result.outcome, Outcome::Limited);
        assert_eq!(result.retry_after, Some(MAX_WINDOW));
    }

    #[tokio::test]
    async fn test_ledger_key_prefix() {
        let (limiter, store, _clock) = limiter(3, 60);
        let limiter = limiter.with_key_prefix("gateway:ratelimit:");

        assert_eq!(limiter.ledger_key("10.0.0.1"), "gateway:ratelimit:10.0.0.1");

        limiter.allow("10.0.0.1").await;
        assert_eq!(store.cardinality("gateway:ratelimit:10.0.0.1"), 1);
        assert_eq!(store.cardinality("rate_limiter:10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn test_rejected_attempts_are_recorded() {
        let (limiter, store, _clock) = limiter(2, 60);

        for _ in 0..5 {
            limiter.allow("A").await;
        }

        assert_eq!(store.cardinality("rate_limiter:A"), 5);
    }

    #[tokio::test]
    async fn test_sliding_window_scenario() {
        let (limiter, _store, clock) = limiter(3, 60);

        let mut decisions = Vec::new();
        for _ in 0..3 {
            decisions.push(limiter.allow("A").await);
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(decisions, vec![true, true, true]);

        // t=3
        assert!(!limiter.allow("A").await);

        // t=61: t=0 and t=1 evicted, t=2 and the rejected t=3 remain
        clock.set(T0 + Duration::from_secs(61));
        assert!(limiter.allow("A").await);
    }

    #[tokio::test]
    async fn test_entry_at_window_start_is_expired() {
        let (limiter, _store, clock) = limiter(1, 60);

        assert!(limiter.allow("boundary").await);
        assert!(limiter.allow("inside").await);

        clock.set(T0 + Duration::from_millis(59_999));
        assert!(!limiter.allow("inside").await);

        clock.set(T0 + Duration::from_secs(60));
        assert!(limiter.allow("boundary").await);
    }

    #[tokio::test]
    async fn test_idle_key_expires() {
        let (limiter, store, clock) = limiter(2, 60);

        for _ in 0..3 {
            limiter.allow("A").await;
        }
        assert!(!limiter.allow("A").await);

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.cardinality("rate_limiter:A"), 0);
        assert!(limiter.allow("A").await);
    }

    #[tokio::test]
    async fn test_distinct_clients_are_independent() {
        let (limiter, _store, _clock) = limiter(1, 60);

        assert!(limiter.allow("A").await);
        assert!(!limiter.allow("A").await);
        assert!(limiter.allow("B").await);
    }

    #[tokio::test]
    async fn test_set_rate_applies_to_next_check() {
        let (limiter, _store, _clock) = limiter(1, 60);

        assert!(limiter.allow("A").await);
        assert!(!limiter.allow("A").await);

        // Two attempts recorded; a limit of 3 leaves room for the third.
        limiter.set_rate(3, Duration::from_secs(60)).unwrap();
        assert!(limiter.allow("A").await);
        assert!(!limiter.allow("A").await);

        assert!(limiter.set_rate(0, Duration::from_secs(60)).is_err());
        assert_eq!(limiter.policy().limit(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let policy = RateLimitPolicy::new(10, Duration::from_secs(60)).unwrap();
        let limiter = DistributedRateLimiter::new(Arc::new(UnreachableStore), policy);

        let result = limiter.check("A").await;
        assert_eq!(result.outcome, Outcome::Unavailable);
        assert!(!limiter.allow("A").await);
        assert_eq!(limiter.backend(), "unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_closed() {
        let policy = RateLimitPolicy::new(10, Duration::from_secs(60)).unwrap();
        let limiter = DistributedRateLimiter::new(Arc::new(StalledStore), policy)
            .with_command_timeout(Duration::from_millis(250));

        let result = limiter.check("A").await;
        assert_eq!(result.outcome, Outcome::Unavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_same_client() {
        let (limiter, _store, _clock) = limiter(10, 60);
        let limiter = Arc::new(limiter);

        // Seven slots taken before the burst leaves room for three
        for _ in 0..7 {
            assert!(limiter.allow("shared").await);
        }

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("shared").await })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
    }
}
