//! Behaviour shared by every limiter backend, exercised through the trait.

use admission_gateway::rate_limit::{
    DistributedRateLimiter, Limiter, LocalRateLimiter, ManualClock, MemoryWindowStore,
    RateLimitPolicy,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

const T0: Duration = Duration::from_secs(1_700_000_000);

fn policy(limit: u32, window_secs: u64) -> RateLimitPolicy {
    RateLimitPolicy::new(limit, Duration::from_secs(window_secs)).unwrap()
}

/// Both backends on one manually driven clock
fn backends(limit: u32, window_secs: u64) -> (ManualClock, Vec<Arc<dyn Limiter>>) {
    let clock = ManualClock::new(T0);

    let local = LocalRateLimiter::with_clock(policy(limit, window_secs), Arc::new(clock.clone()));
    let store = MemoryWindowStore::with_clock(Arc::new(clock.clone()));
    let distributed = DistributedRateLimiter::new(Arc::new(store), policy(limit, window_secs))
        .with_clock(Arc::new(clock.clone()));

    (clock, vec![Arc::new(local), Arc::new(distributed)])
}

#[tokio::test]
async fn test_sliding_window_scenario() {
    let (clock, limiters) = backends(3, 60);

    for limiter in &limiters {
        let client = format!("scenario-{}", limiter.backend());
        clock.set(T0);

        let mut decisions = Vec::new();
        for offset in [0, 1, 2, 3] {
            clock.set(T0 + Duration::from_secs(offset));
            decisions.push(limiter.allow(&client).await);
        }
        assert_eq!(decisions, vec![true, true, true, false], "{}", limiter.backend());

        // t=61: entries from t=0 and t=1 have left the window, leaving
        // t=2 and the rejected t=3 attempt
        clock.set(T0 + Duration::from_secs(61));
        assert!(limiter.allow(&client).await, "{}", limiter.backend());
    }
}

#[tokio::test]
async fn test_distinct_clients_are_independent() {
    let (_clock, limiters) = backends(2, 60);

    for limiter in &limiters {
        assert!(limiter.allow("192.168.1.1").await);
        assert!(limiter.allow("192.168.1.1").await);
        assert!(!limiter.allow("192.168.1.1").await);

        assert!(limiter.allow("192.168.1.2").await);
        assert!(limiter.allow("192.168.1.2").await);
        assert!(!limiter.allow("192.168.1.2").await);
    }
}

#[tokio::test]
async fn test_denial_reports_retry_after() {
    let (clock, limiters) = backends(1, 60);

    for limiter in &limiters {
        clock.set(T0);
        assert!(limiter.check("retry").await.is_allowed());

        clock.set(T0 + Duration::from_secs(15));
        let result = limiter.check("retry").await;
        assert!(!result.is_allowed());
        assert_eq!(result.limit, 1);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, Some(Duration::from_secs(60)));
    }
}

#[tokio::test]
async fn test_retry_after_reopens_the_window() {
    let (clock, limiters) = backends(2, 60);

    for limiter in &limiters {
        clock.set(T0);
        assert!(limiter.allow("reopen").await);
        clock.set(T0 + Duration::from_secs(10));
        assert!(limiter.allow("reopen").await);

        clock.set(T0 + Duration::from_secs(20));
        let result = limiter.check("reopen").await;
        assert!(!result.is_allowed(), "{}", limiter.backend());
        let retry_after = result.retry_after.unwrap();
        assert_eq!(retry_after, Duration::from_secs(50), "{}", limiter.backend());

        clock.set(T0 + Duration::from_secs(20) + retry_after);
        assert!(limiter.allow("reopen").await, "{}", limiter.backend());
    }
}

#[tokio::test]
async fn test_set_rate_applies_to_next_decision() {
    let (_clock, limiters) = backends(1, 60);

    for limiter in &limiters {
        assert!(limiter.allow("client").await);
        assert!(!limiter.allow("client").await);

        limiter.set_rate(5, Duration::from_secs(60)).unwrap();
        assert_eq!(limiter.policy(), policy(5, 60));

        assert!(limiter.allow("client").await);
        for _ in 0..5 {
            assert!(limiter.allow("fresh").await);
        }
        assert!(!limiter.allow("fresh").await);

        assert!(limiter.set_rate(0, Duration::from_secs(60)).is_err());
        assert_eq!(limiter.policy(), policy(5, 60));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_exceed_limit() {
    let (_clock, limiters) = backends(10, 60);

    for limiter in limiters {
        let tasks = (0..100).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("burst").await })
        });

        let admitted = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(admitted, 10, "{}", limiter.backend());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_fill_remaining_slots() {
    let (_clock, limiters) = backends(10, 60);

    for limiter in limiters {
        for prefilled in [0u32, 4, 9] {
            let client = format!("partial-{}", prefilled);
            for _ in 0..prefilled {
                assert!(limiter.allow(&client).await);
            }

            let tasks = (0..40).map(|_| {
                let limiter = limiter.clone();
                let client = client.clone();
                tokio::spawn(async move { limiter.allow(&client).await })
            });

            let admitted = join_all(tasks)
                .await
                .into_iter()
                .filter(|r| matches!(r, Ok(true)))
                .count();

            assert_eq!(
                admitted,
                (10 - prefilled) as usize,
                "{} with {} slots taken",
                limiter.backend(),
                prefilled
            );
        }
    }
}
