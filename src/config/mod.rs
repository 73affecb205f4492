use crate::error::{GatewayError, Result};
use crate::hotreload::HotReloadConfig;
use crate::rate_limit::middleware::ClientIdSource;
use crate::rate_limit::types::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for layered overrides, e.g.
/// `GATEWAY__RATE_LIMITING__LIMIT__REQUESTS=10`
const ENV_PREFIX: &str = "GATEWAY";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Route definitions
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Metrics endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Policy hot reload
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outbound forwarding timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Exact route path (e.g., "/service/authenticate")
    pub path: String,
    /// Allowed HTTP methods (if empty, all methods allowed)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Route description
    #[serde(default)]
    pub description: String,
}

/// Which limiter backend to run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LimiterBackend {
    /// In-process ledgers
    #[default]
    Local,
    /// Shared Redis ledgers
    Redis,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitingConfig {
    /// Uniform per-client limit
    #[serde(default)]
    pub limit: RateLimitConfig,
    /// Backend selection
    #[serde(default)]
    pub backend: LimiterBackend,
    /// Redis configuration for distributed rate limiting
    #[serde(default)]
    pub redis: Option<RateLimitRedisConfig>,
    /// How requests are attributed to clients
    #[serde(default)]
    pub client_id: ClientIdSource,
    /// How often the local backend drops idle ledgers
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Redis configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix for ledger keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Bound on connecting and the startup PING
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on each rate limit transaction
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// Prometheus metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Expose the endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    10
}

fn default_routes() -> Vec<RouteConfig> {
    vec![RouteConfig {
        path: "/service/authenticate".to_string(),
        methods: ["GET", "POST", "PUT", "DELETE"]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        description: "Authentication service".to_string(),
    }]
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_key_prefix() -> String {
    crate::rate_limit::distributed::DEFAULT_KEY_PREFIX.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: RateLimitConfig::default(),
            backend: LimiterBackend::default(),
            redis: None,
            client_id: ClientIdSource::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl ServerConfig {
    /// Forwarding timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitingConfig {
    /// Janitor period as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RateLimitRedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, layered with `GATEWAY__*`
    /// environment variables and `PORT`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(GatewayError::Config(format!(
                "Failed to read config file: {} not found",
                path.display()
            )));
        }

        let mut config: GatewayConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// `PORT` takes precedence over the file, as deployment platforms set it
    fn apply_port_override(&mut self, port: Option<&str>) -> Result<()> {
        let Some(port) = port.filter(|p| !p.is_empty()) else {
            return Ok(());
        };

        self.server.port = port
            .parse()
            .map_err(|_| GatewayError::Config(format!("Invalid PORT value: {}", port)))?;
        debug!(port = self.server.port, "Port overridden from environment");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            return Err(GatewayError::Config(
                "At least one route must be configured".to_string(),
            ));
        }

        // Validate routes
        for route in &self.routes {
            if route.path.is_empty() || !route.path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "Route path must start with '/': '{}'",
                    route.path
                )));
            }

            // Validate methods
            for method in &route.methods {
                let method_upper = method.to_uppercase();
                if !["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
                    .contains(&method_upper.as_str())
                {
                    return Err(GatewayError::Config(format!(
                        "Invalid HTTP method '{}' for route: {}",
                        method, route.path
                    )));
                }
            }
        }

        if self.server.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Server timeout must be > 0".to_string(),
            ));
        }

        // Validate rate limits
        let rate_limiting = &self.rate_limiting;
        rate_limiting.limit.policy()?;

        if rate_limiting.sweep_interval_secs == 0 {
            return Err(GatewayError::Config(
                "Rate limit sweep interval must be > 0".to_string(),
            ));
        }

        if let ClientIdSource::Header { name } = &rate_limiting.client_id {
            http::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                GatewayError::Config(format!("Invalid client id header name: '{}'", name))
            })?;
        }

        match (&rate_limiting.backend, &rate_limiting.redis) {
            (LimiterBackend::Redis, None) => {
                return Err(GatewayError::Config(
                    "rate_limiting.redis is required for the redis backend".to_string(),
                ));
            }
            (_, Some(redis)) => {
                if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
                    return Err(GatewayError::Config(format!(
                        "Redis URL must start with redis:// or rediss://: {}",
                        redis.url
                    )));
                }
                if redis.connect_timeout_ms == 0 || redis.command_timeout_ms == 0 {
                    return Err(GatewayError::Config(
                        "Redis timeouts must be > 0".to_string(),
                    ));
                }
            }
            (LimiterBackend::Local, None) => {}
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "Metrics path must start with '/': '{}'",
                self.metrics.path
            )));
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            routes: default_routes(),
            rate_limiting: RateLimitingConfig::default(),
            metrics: MetricsConfig::default(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}
