//! Rate limiting module
//!
//! Sliding window admission control with two interchangeable backends
//! behind the [`Limiter`] trait:
//!
//! - **Local**: per-client timestamp ledgers in process memory under one lock
//! - **Distributed**: per-client sorted sets in a shared store (Redis), updated
//!   by one atomic transaction per check so every gateway instance agrees
//!
//! Both backends record every attempt, count the ledger entries newer than
//! `now - window` (the new one included) and admit while that count is at
//! most the limit. Rejected attempts therefore keep occupying the window.
//! A backend fault never admits.
//!
//! # Example
//!
//! ```rust,no_run
//! use admission_gateway::rate_limit::{
//!     ClientIdSource, Limiter, LocalRateLimiter, RateLimitMiddleware, RateLimitPolicy,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RateLimitPolicy::new(3, Duration::from_secs(60)).unwrap();
//!
//!     // Create local-only rate limiter
//!     let limiter: Arc<dyn Limiter> = Arc::new(LocalRateLimiter::new(policy));
//!     assert!(limiter.allow("192.168.1.1").await);
//!
//!     // Or over Redis
//!     // let store = RedisWindowStore::connect("redis://localhost:6379", Duration::from_secs(5)).await?;
//!     // let limiter = Arc::new(DistributedRateLimiter::new(Arc::new(store), policy));
//!
//!     let _middleware = RateLimitMiddleware::new(limiter, ClientIdSource::PeerIp);
//! }
//! ```

pub mod clock;
pub mod distributed;
pub mod limiter;
pub mod local;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use distributed::DistributedRateLimiter;
pub use limiter::Limiter;
pub use local::LocalRateLimiter;
pub use middleware::{rate_limit_middleware, ClientIdSource, RateLimitMiddleware};
pub use self::redis::RedisWindowStore;
pub use service::build_limiter;
pub use store::{MemoryWindowStore, WindowSnapshot, WindowStore, WindowTransaction};
pub use types::{Outcome, RateLimitConfig, RateLimitPolicy, RateLimitResult};
