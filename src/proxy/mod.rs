use crate::error::{GatewayError, Result};
use crate::metrics;
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, Response},
};
use http_body_util::BodyExt;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
}

impl ProxyState {
    /// Create a new proxy state whose outbound calls give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

/// Query parameters understood by the forwarder
#[derive(Debug, Default, Deserialize)]
pub struct ForwardParams {
    /// Base URL of the target service, e.g. `http://auth.internal:9000`
    pub target: Option<String>,
}

/// Forward an admitted request to the service named by `?target=`.
///
/// The outbound URL is the target followed by the request path. The
/// incoming query string is not forwarded.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    Query(params): Query<ForwardParams>,
    req: Request,
) -> Result<Response<Body>> {
    let started = Instant::now();
    let result = forward(&state, params, req).await;

    let status = match &result {
        Ok(response) => response.status().as_u16(),
        Err(e) => e.status_code().as_u16(),
    };
    metrics::record_forward_request(status, started.elapsed());

    result
}

async fn forward(state: &ProxyState, params: ForwardParams, req: Request) -> Result<Response<Body>> {
    let target = params
        .target
        .filter(|t| !t.is_empty())
        .ok_or(GatewayError::MissingTarget)?;

    let method = req.method().clone();
    let url = outbound_url(&target, req.uri().path());

    info!(method = %method, url = %url, "Forwarding request");

    let headers = forwardable_headers(req.headers(), true);
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GatewayError::Http(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let outbound = state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .build()
        .map_err(|e| GatewayError::Proxy(format!("Failed to build request to {}: {}", url, e)))?;

    let backend_response = state.client.execute(outbound).await.map_err(|e| {
        if e.is_timeout() {
            warn!(url = %url, "Target service timed out");
        } else {
            warn!(url = %url, error = %e, "Target service request failed");
        }
        GatewayError::Backend(e.to_string())
    })?;

    let status = backend_response.status();
    debug!(url = %url, status = %status, "Target service responded");

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        *headers = forwardable_headers(backend_response.headers(), false);
    }

    response
        .body(Body::from_stream(backend_response.bytes_stream()))
        .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
}

/// Join the target base and the request path
fn outbound_url(target: &str, path: &str) -> String {
    format!("{}{}", target, path)
}

/// Copy headers, dropping hop-by-hop ones (and `Host` for outbound requests)
fn forwardable_headers(headers: &HeaderMap, outbound: bool) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str) || (outbound && name_str == "host") {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
