use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::rate_limit::limiter::Limiter;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hot reload configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct HotReloadConfig {
    /// Enable hot reload
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Quiet period after a change before the file is re-read
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_enabled() -> bool {
    false
}

fn default_debounce_ms() -> u64 {
    1000 // 1 second
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// What a reload did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The limiter now runs the new policy
    PolicyUpdated,
    /// Nothing the running gateway can apply changed
    Unchanged,
}

/// Watches the configuration file and applies policy changes to a
/// running limiter.
///
/// Only `rate_limiting.limit` is applied live. Any other difference is
/// logged and takes effect on the next restart.
pub struct HotReloadService {
    config_path: PathBuf,
    limiter: Arc<dyn Limiter>,
    baseline: GatewayConfig,
    debounce_duration: Duration,
}

impl HotReloadService {
    /// Create a new hot reload service
    pub fn new(
        config_path: PathBuf,
        limiter: Arc<dyn Limiter>,
        baseline: GatewayConfig,
        debounce_ms: u64,
    ) -> Self {
        Self {
            config_path,
            limiter,
            baseline,
            debounce_duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Start watching the configuration file for changes.
    ///
    /// The watcher lives inside the returned task, which runs until it is
    /// aborted. Aborting the handle stops watching.
    pub async fn start(mut self) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    ) {
                        let _ = tx.blocking_send(event);
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| GatewayError::Internal(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                GatewayError::Internal(format!("Failed to watch config file: {}", e))
            })?;

        info!(
            path = %self.config_path.display(),
            debounce_ms = self.debounce_duration.as_millis(),
            "Hot reload watcher started"
        );

        let task = tokio::spawn(async move {
            // Holds the sender, so the loop only ends when the task is aborted
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                debug!("File change event detected: {:?}", event);

                // Editors emit bursts of events per save; wait for the
                // file to settle and fold the burst into one reload.
                tokio::time::sleep(self.debounce_duration).await;
                while rx.try_recv().is_ok() {}

                if let Err(e) = self.reload_once() {
                    error!("Failed to reload configuration: {}", e);
                }
            }
        });

        Ok(task)
    }

    /// Re-read the file and apply a changed policy.
    ///
    /// An unreadable or invalid file leaves the running policy untouched.
    pub fn reload_once(&mut self) -> Result<ReloadOutcome> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = GatewayConfig::from_file(&self.config_path)?;
        new_config.validate()?;

        let mut rest = new_config.clone();
        rest.rate_limiting.limit = self.baseline.rate_limiting.limit.clone();
        if rest != self.baseline {
            warn!("Configuration changes outside rate_limiting.limit require a restart");
        }

        let policy = new_config.rate_limiting.limit.policy()?;
        let outcome = if policy == self.limiter.policy() {
            debug!("Rate limit policy unchanged");
            ReloadOutcome::Unchanged
        } else {
            self.limiter.set_rate(policy.limit(), policy.window())?;
            info!(
                limit = policy.limit(),
                window_secs = policy.window().as_secs(),
                "Rate limit policy updated"
            );
            ReloadOutcome::PolicyUpdated
        };

        self.baseline = new_config;
        Ok(outcome)
    }
}

/// Watch a configuration file and apply policy changes to `limiter`
pub async fn watch_config_file<P: AsRef<Path>>(
    config_path: P,
    limiter: Arc<dyn Limiter>,
    baseline: GatewayConfig,
    debounce_ms: u64,
) -> Result<JoinHandle<()>> {
    let service = HotReloadService::new(
        config_path.as_ref().to_path_buf(),
        limiter,
        baseline,
        debounce_ms,
    );

    service.start().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::local::LocalRateLimiter;
    use crate::rate_limit::types::RateLimitPolicy;
    use std::fs;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    fn config_file(requests: u32, window_secs: u64) -> NamedTempFile {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write_policy(&file, requests, window_secs);
        file
    }

    fn write_policy(file: &NamedTempFile, requests: u32, window_secs: u64) {
        let yaml = format!(
            "rate_limiting:\n  limit:\n    requests: {}\n    window_secs: {}\n",
            requests, window_secs
        );
        fs::write(file.path(), yaml).unwrap();
    }

    fn service(file: &NamedTempFile) -> (HotReloadService, Arc<LocalRateLimiter>) {
        let baseline = GatewayConfig::from_file(file.path()).unwrap();
        let policy = baseline.rate_limiting.limit.policy().unwrap();
        let limiter = Arc::new(LocalRateLimiter::new(policy));

        let service = HotReloadService::new(
            file.path().to_path_buf(),
            limiter.clone(),
            baseline,
            10,
        );
        (service, limiter)
    }

    #[tokio::test]
    async fn test_policy_change_is_applied() {
        let file = config_file(3, 60);
        let (mut service, limiter) = service(&file);

        for _ in 0..3 {
            assert!(limiter.allow("192.168.1.1").await);
        }
        assert!(!limiter.allow("192.168.1.1").await);

        write_policy(&file, 10, 30);
        assert_eq!(service.reload_once().unwrap(), ReloadOutcome::PolicyUpdated);
        assert_eq!(
            limiter.policy(),
            RateLimitPolicy::new(10, Duration::from_secs(30)).unwrap()
        );
        assert!(limiter.allow("192.168.1.1").await);
    }

    #[tokio::test]
    async fn test_unchanged_policy() {
        let file = config_file(3, 60);
        let (mut service, limiter) = service(&file);

        assert_eq!(service.reload_once().unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(limiter.policy().limit(), 3);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_running_policy() {
        let file = config_file(3, 60);
        let (mut service, limiter) = service(&file);

        write_policy(&file, 0, 60);
        assert_err!(service.reload_once());
        assert_eq!(limiter.policy().limit(), 3);

        fs::write(file.path(), "rate_limiting: [not, a, map").unwrap();
        assert_err!(service.reload_once());
        assert_eq!(limiter.policy().limit(), 3);
    }

    #[tokio::test]
    async fn test_watcher_applies_change() {
        let file = config_file(3, 60);
        let (service, limiter) = service(&file);
        let _task = assert_ok!(service.start().await);

        write_policy(&file, 5, 60);

        // File system notification latency varies by platform
        for _ in 0..100 {
            if limiter.policy().limit() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(limiter.policy().limit(), 5);
    }

    #[tokio::test]
    async fn test_aborted_watcher_stops_applying_changes() {
        let file = config_file(3, 60);
        let (service, limiter) = service(&file);
        let task = assert_ok!(service.start().await);

        task.abort();
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());

        write_policy(&file, 5, 60);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(limiter.policy().limit(), 3);
    }

    #[test]
    fn test_hot_reload_config_defaults() {
        let config = HotReloadConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.debounce_ms, 1000);
    }
}
