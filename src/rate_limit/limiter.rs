//! Admission contract shared by the local and distributed backends.

use super::types::{RateLimitPolicy, RateLimitResult};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Sliding window admission control.
///
/// Every check records the attempt before counting, so verification and
/// recording cannot be separated. A check admits the request when the
/// number of ledger entries inside `(now - window, now]`, including the
/// one just recorded, does not exceed the limit.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Record an attempt for `client_id` and decide whether it is admitted
    async fn check(&self, client_id: &str) -> RateLimitResult;

    /// Whether the request is admitted. Backend faults deny.
    async fn allow(&self, client_id: &str) -> bool {
        self.check(client_id).await.is_allowed()
    }

    /// Replace the active policy. Invalid input leaves the policy unchanged.
    fn set_rate(&self, limit: u32, window: Duration) -> Result<()>;

    /// Policy currently in force
    fn policy(&self) -> RateLimitPolicy;

    /// Backend name for logs and metrics
    fn backend(&self) -> &'static str;
}
