use super::limiter::Limiter;
use super::types::{Outcome, RateLimitResult};
use crate::metrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier used when the peer address is unknown
const UNKNOWN_CLIENT: &str = "unknown";

/// Where the client identifier comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ClientIdSource {
    /// Peer IP address as seen by the listener
    #[default]
    PeerIp,
    /// First value of a request header, falling back to the peer IP
    Header { name: String },
}

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitMiddleware {
    /// Shared limiter; all admission state lives there
    limiter: Arc<dyn Limiter>,
    /// Client identification policy
    client_id: ClientIdSource,
}

impl RateLimitMiddleware {
    /// Create a new rate limiting middleware
    pub fn new(limiter: Arc<dyn Limiter>, client_id: ClientIdSource) -> Self {
        Self { limiter, client_id }
    }

    /// The limiter this middleware consults
    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }

    /// Derive the client identifier for a request
    pub fn client_id(&self, request: &Request) -> String {
        let peer_ip = || {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
                .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
        };

        match &self.client_id {
            ClientIdSource::PeerIp => peer_ip(),
            ClientIdSource::Header { name } => {
                header_client_id(request.headers(), name).unwrap_or_else(peer_ip)
            }
        }
    }

    /// Apply rate limiting to a request
    pub async fn apply(&self, request: Request) -> Result<Request, Response> {
        let client_id = self.client_id(&request);
        let result = self.limiter.check(&client_id).await;
        metrics::record_rate_limit_decision(self.limiter.backend(), result.outcome);

        match result.outcome {
            Outcome::Allowed => {
                debug!(
                    client_id = %client_id,
                    remaining = result.remaining,
                    "Rate limit check passed"
                );
                Ok(request)
            }
            Outcome::Limited => {
                warn!(client_id = %client_id, "Rate limit exceeded");
                Err(create_rate_limit_response(&result))
            }
            Outcome::Unavailable => {
                warn!(client_id = %client_id, "Rate limiter unavailable, rejecting request");
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Rate limiter unavailable",
                )
                    .into_response())
            }
        }
    }
}

fn header_client_id(headers: &HeaderMap, name: &str) -> Option<String> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let value = headers.get(name)?.to_str().ok()?;
    // Proxies append to lists such as X-Forwarded-For; the first is the origin.
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Create a 429 Too Many Requests response with rate limit headers
fn create_rate_limit_response(result: &RateLimitResult) -> Response {
    let mut headers = HeaderMap::new();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(result.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));

    if let Some(retry) = result.retry_after {
        // Whole seconds, rounded up, never zero.
        let secs = retry.as_secs() + u64::from(retry.subsec_nanos() > 0);
        headers.insert("Retry-After", HeaderValue::from(secs.max(1)));
    }

    (StatusCode::TOO_MANY_REQUESTS, headers, "Too Many Requests").into_response()
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.apply(request).await {
        Ok(request) => next.run(request).await,
        Err(response) => response,
    }
}
