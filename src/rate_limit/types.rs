use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted window. Ledger arithmetic runs in Unix milliseconds,
/// and this keeps `now + window` far from overflow.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Active admission policy: at most `limit` requests per client within
/// any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    limit: u32,
    window: Duration,
}

impl RateLimitPolicy {
    /// Create a policy, rejecting a zero limit, a window shorter than
    /// the ledger resolution (1ms) or one longer than [`MAX_WINDOW`]
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(GatewayError::Config(
                "Rate limit requests must be > 0".to_string(),
            ));
        }
        if window < Duration::from_millis(1) {
            return Err(GatewayError::Config(format!(
                "Rate limit window must be at least 1ms, got {:?}",
                window
            )));
        }
        if window > MAX_WINDOW {
            return Err(GatewayError::Config(format!(
                "Rate limit window must be at most {}s, got {:?}",
                MAX_WINDOW.as_secs(),
                window
            )));
        }

        Ok(Self { limit, window })
    }

    /// Maximum admitted requests per window
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Length of the sliding window
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Rate limit configuration as written in the gateway config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed
    #[serde(default = "default_requests")]
    pub requests: u32,
    /// Time window for the limit (in seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_requests() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Build the validated policy
    pub fn policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::new(self.requests, self.window())
    }
}

/// How an admission check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Within policy, request may proceed
    Allowed,
    /// Over the limit for the current window
    Limited,
    /// The backend could not decide; treated as a denial
    Unavailable,
}

impl Outcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Limited => "limited",
            Outcome::Unavailable => "unavailable",
        }
    }
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Decision
    pub outcome: Outcome,
    /// Limit in force when the decision was taken
    pub limit: u32,
    /// Requests still available in the current window
    pub remaining: u32,
    /// Earliest point a retry can be admitted (for 429 responses)
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(limit: u32, remaining: u32) -> Self {
        Self {
            outcome: Outcome::Allowed,
            limit,
            remaining,
            retry_after: None,
        }
    }

    /// Create a denied result
    pub fn limited(limit: u32, retry_after: Duration) -> Self {
        Self {
            outcome: Outcome::Limited,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// Create a fail-closed result for a backend fault
    pub fn unavailable(limit: u32) -> Self {
        Self {
            outcome: Outcome::Unavailable,
            limit,
            remaining: 0,
            retry_after: None,
        }
    }

    /// Whether the request is admitted
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allowed
    }
}
