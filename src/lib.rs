pub mod config;
pub mod error;
pub mod hotreload;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;

use crate::config::{GatewayConfig, RouteConfig};
use crate::error::{GatewayError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{build_limiter, rate_limit_middleware, RateLimitMiddleware};
use axum::{
    middleware,
    routing::{any, get, on, MethodFilter, MethodRouter},
    Router,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the gateway application.
///
/// Every configured route forwards through [`proxy_handler`] behind the
/// rate limit middleware. The metrics endpoint, when given, is mounted
/// outside the middleware so scrapes are never limited.
pub fn build_app(
    routes: &[RouteConfig],
    proxy_state: ProxyState,
    rate_limit: RateLimitMiddleware,
    metrics: Option<(&str, MetricsService)>,
) -> Result<Router> {
    if routes.is_empty() {
        return Err(GatewayError::Config(
            "At least one route must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut gateway = Router::new();

    for route in routes {
        if !seen.insert(route.path.as_str()) {
            return Err(GatewayError::Config(format!(
                "Duplicate route path: {}",
                route.path
            )));
        }
        gateway = gateway.route(&route.path, method_router(route)?);
    }

    let mut app = gateway
        .route_layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .with_state(proxy_state);

    if let Some((path, service)) = metrics {
        if seen.contains(path) {
            return Err(GatewayError::Config(format!(
                "Metrics path collides with a route: {}",
                path
            )));
        }
        app = app.merge(
            Router::new()
                .route(path, get(metrics_handler))
                .with_state(service),
        );
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}

/// Method routing for one configured route; no methods means any method
fn method_router(route: &RouteConfig) -> Result<MethodRouter<ProxyState>> {
    if route.methods.is_empty() {
        return Ok(any(proxy_handler));
    }

    let mut filter: Option<MethodFilter> = None;
    for method in &route.methods {
        let next = method_filter(method).ok_or_else(|| {
            GatewayError::Config(format!(
                "Invalid HTTP method '{}' for route: {}",
                method, route.path
            ))
        })?;
        filter = Some(match filter {
            Some(current) => current.or(next),
            None => next,
        });
    }

    // Non-empty methods always yield a filter
    Ok(on(filter.unwrap_or(MethodFilter::GET), proxy_handler))
}

fn method_filter(method: &str) -> Option<MethodFilter> {
    match method.to_uppercase().as_str() {
        "GET" => Some(MethodFilter::GET),
        "POST" => Some(MethodFilter::POST),
        "PUT" => Some(MethodFilter::PUT),
        "DELETE" => Some(MethodFilter::DELETE),
        "PATCH" => Some(MethodFilter::PATCH),
        "HEAD" => Some(MethodFilter::HEAD),
        "OPTIONS" => Some(MethodFilter::OPTIONS),
        _ => None,
    }
}

/// Initialize the gateway server
///
/// `config_path` is watched for policy changes when hot reload is enabled.
pub async fn init_gateway(config: GatewayConfig, config_path: Option<PathBuf>) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting API Gateway");

    let limiter = build_limiter(&config.rate_limiting).await?;
    info!(backend = limiter.backend(), "Rate limiter ready");

    let rate_limit = RateLimitMiddleware::new(limiter.clone(), config.rate_limiting.client_id.clone());
    let proxy_state = ProxyState::new(config.server.timeout())?;

    let metrics_service = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let app = build_app(
        &config.routes,
        proxy_state,
        rate_limit,
        metrics_service.map(|service| (config.metrics.path.as_str(), service)),
    )?;
    info!("Loaded {} routes", config.routes.len());

    let reload_task = match (&config_path, config.hot_reload.enabled) {
        (Some(path), true) => Some(
            hotreload::watch_config_file(
                path,
                limiter.clone(),
                config.clone(),
                config.hot_reload.debounce_ms,
            )
            .await?,
        ),
        (None, true) => {
            info!("Hot reload enabled but no config file given, skipping");
            None
        }
        (_, false) => None,
    };

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GatewayError::Io)?;

    info!("Server listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)));

    if let Some(task) = reload_task {
        task.abort();
    }

    served
}

/// Initialize tracing/logging
///
/// `RUST_LOG` selects levels; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "admission_gateway=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
