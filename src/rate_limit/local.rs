use super::clock::{Clock, SystemClock};
use super::limiter::Limiter;
use super::types::{RateLimitPolicy, RateLimitResult};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Policy and ledgers live under the same lock so `set_rate` is atomic
/// with respect to checks.
struct LocalState {
    policy: RateLimitPolicy,
    /// Client identifier -> request timestamps, oldest first
    ledgers: HashMap<String, VecDeque<Duration>>,
}

/// Local (in-memory) sliding window rate limiter.
///
/// One mutex guards the whole ledger map. Each ledger keeps at most
/// `limit` entries: the newest `limit` timestamps are enough to tell
/// whether `limit` earlier attempts fall inside the window.
pub struct LocalRateLimiter {
    state: Mutex<LocalState>,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    /// Create a new local rate limiter on the wall clock
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a new local rate limiter reading time from `clock`
    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LocalState {
                policy,
                ledgers: HashMap::new(),
            }),
            clock,
        }
    }

    /// Record an attempt and decide it
    fn evaluate(&self, client_id: &str) -> RateLimitResult {
        // Read under the lock so ledger timestamps stay in arrival order
        let mut guard = self.state.lock();
        let now = self.clock.now();
        let state = &mut *guard;
        let policy = state.policy;
        let limit = policy.limit() as usize;

        let ledger = state
            .ledgers
            .entry(client_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(limit));

        // An entry exactly at the window start is already outside.
        if let Some(window_start) = now.checked_sub(policy.window()) {
            ledger.retain(|&at| at > window_start);
        }

        let prior = ledger.len();
        ledger.push_back(now);
        while ledger.len() > limit {
            ledger.pop_front();
        }

        if prior < limit {
            let remaining = (limit - prior - 1) as u32;
            debug!(
                client_id = %client_id,
                remaining,
                "Local rate limit check passed"
            );
            RateLimitResult::allowed(policy.limit(), remaining)
        } else {
            // Once the oldest retained entry leaves the window fewer than
            // `limit` attempts remain inside it.
            let oldest = ledger.front().copied().unwrap_or(now);
            let retry_after = oldest.saturating_add(policy.window()).saturating_sub(now);
            debug!(
                client_id = %client_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Local rate limit exceeded"
            );
            RateLimitResult::limited(policy.limit(), retry_after)
        }
    }

    /// Drop ledgers with no entry inside the current window.
    ///
    /// Returns the number of clients removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let Some(window_start) = now.checked_sub(state.policy.window()) else {
            return 0;
        };

        let before = state.ledgers.len();
        state
            .ledgers
            .retain(|_, ledger| ledger.back().is_some_and(|&at| at > window_start));
        before - state.ledgers.len()
    }

    /// Periodically purge idle ledgers.
    ///
    /// The task holds a weak reference and exits once the limiter is dropped.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(limiter) = limiter.upgrade() else {
                    debug!("Local rate limiter dropped, stopping janitor");
                    break;
                };

                let purged = limiter.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged idle rate limit ledgers");
                }
            }
        })
    }

    /// Get the number of tracked clients (for testing/monitoring)
    pub fn active_clients(&self) -> usize {
        self.state.lock().ledgers.len()
    }
}

#[async_trait]
impl Limiter for LocalRateLimiter {
    async fn check(&self, client_id: &str) -> RateLimitResult {
        self.evaluate(client_id)
    }

    fn set_rate(&self, limit: u32, window: Duration) -> Result<()> {
        let policy = RateLimitPolicy::new(limit, window)?;
        self.state.lock().policy = policy;
        info!(
            limit,
            window_ms = window.as_millis() as u64,
            "Local rate limit policy updated"
        );
        Ok(())
    }

    fn policy(&self) -> RateLimitPolicy {
        self.state.lock().policy
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
