//! Shared ledger storage for the distributed limiter.
//!
//! A store holds one score-indexed set per client key. The only operation
//! the limiter needs is an indivisible batch of add, evict, count and
//! expire; any store that can run that batch atomically per key can back
//! [`DistributedRateLimiter`](super::distributed::DistributedRateLimiter).

use super::clock::{Clock, SystemClock};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// One atomic ledger update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowTransaction {
    /// Prefixed client key
    pub key: String,
    /// Unique token for this attempt
    pub member: String,
    /// Attempt time, Unix milliseconds
    pub score_ms: i64,
    /// Members scored at or below this value are evicted
    pub evict_through_ms: i64,
    /// Policy limit; selects which score the snapshot reports
    pub limit: u32,
    /// Key expiry, reset on every update
    pub ttl: Duration,
}

/// Ledger state right after a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Members left in the window, including the one just added
    pub count: u64,
    /// Score of the `limit`-th newest member, `None` while fewer remain.
    /// Another attempt fits once this member leaves the window.
    pub boundary_ms: Option<i64>,
}

/// Score-indexed ledger storage with atomic batched updates
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Add the member, evict expired members, count what is left, read
    /// the boundary score and reset the key expiry as one unit.
    async fn record_and_count(&self, tx: &WindowTransaction) -> Result<WindowSnapshot>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    /// Store name for logs and metrics
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct ScoredSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
    expires_at_ms: Option<i64>,
}

impl ScoredSet {
    fn add(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn evict_through(&mut self, max_score: i64) {
        while let Some((score, member)) = self.ordered.first().cloned() {
            if score > max_score {
                break;
            }
            self.ordered.pop_first();
            self.scores.remove(&member);
        }
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// In-process [`WindowStore`] with the same semantics as the Redis store,
/// including key expiry.
///
/// The whole map sits behind one lock, which makes every transaction
/// atomic. Useful for single-node deployments and tests.
#[derive(Debug)]
pub struct MemoryWindowStore {
    sets: Mutex<HashMap<String, ScoredSet>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose key expiry follows `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn now_ms(&self) -> i64 {
        i64::try_from(self.clock.now().as_millis()).unwrap_or(i64::MAX)
    }

    /// Number of members stored under `key`, zero once the key expired
    pub fn cardinality(&self, key: &str) -> u64 {
        let now_ms = self.now_ms();
        self.sets
            .lock()
            .get(key)
            .filter(|set| !set.is_expired(now_ms))
            .map_or(0, |set| set.scores.len() as u64)
    }

    /// Drop expired keys, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.now_ms();
        let mut sets = self.sets.lock();
        let before = sets.len();
        sets.retain(|_, set| !set.is_expired(now_ms));
        before - sets.len()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn record_and_count(&self, tx: &WindowTransaction) -> Result<WindowSnapshot> {
        let now_ms = self.now_ms();
        let mut sets = self.sets.lock();

        if sets.get(&tx.key).is_some_and(|set| set.is_expired(now_ms)) {
            sets.remove(&tx.key);
        }

        let set = sets.entry(tx.key.clone()).or_default();
        set.add(&tx.member, tx.score_ms);
        set.evict_through(tx.evict_through_ms);
        let ttl_ms = i64::try_from(tx.ttl.as_millis()).unwrap_or(i64::MAX);
        set.expires_at_ms = Some(now_ms.saturating_add(ttl_ms));

        let rank = (tx.limit as usize).saturating_sub(1);
        Ok(WindowSnapshot {
            count: set.scores.len() as u64,
            boundary_ms: set.ordered.iter().rev().nth(rank).map(|(score, _)| *score),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
