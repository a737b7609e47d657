//! The fixed request pipeline.
//!
//! Execution order for a matched route:
//! security headers → parameter parsing → rate limiter → trace logging →
//! access gate → handler. Unmatched paths go straight from the security
//! headers to the 404 fallback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::{debug, info, trace, Instrument};

use super::error::ApiError;
use super::rate_limit::RateLimiter;
use super::server::ClientAddr;
use crate::config::ApiServerConfig;
use crate::request_span;
use crate::secrets::SecretString;

/// Header carrying the client access key.
pub const ACCESS_KEY_HEADER: &str = "client-access-key";
/// Query parameter accepted in place of [`ACCESS_KEY_HEADER`].
pub const ACCESS_KEY_QUERY: &str = "clientaccesskey";
/// Health-check path; rejected pings are not logged.
pub const PING_PATH: &str = "/ping";

const REDACTED: &str = "[REDACTED]";

/// Shared, read-only state of the request pipeline.
#[derive(Clone)]
pub struct ApiState {
    pub access_key: SecretString,
    pub namespace: String,
    pub static_asset_extensions: Arc<Vec<String>>,
    pub ping_requires_access_key: bool,
    pub max_body_bytes: usize,
    pub rate_limiter: RateLimiter,
}

impl ApiState {
    pub fn new(
        access_key: SecretString,
        namespace: impl Into<String>,
        config: &ApiServerConfig,
    ) -> Self {
        Self {
            access_key,
            namespace: namespace.into(),
            static_asset_extensions: Arc::new(config.static_asset_extensions.clone()),
            ping_requires_access_key: config.ping_requires_access_key,
            max_body_bytes: config.max_body_bytes,
            rate_limiter: RateLimiter::new(config.rate_limit),
        }
    }

    fn is_static_asset(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.static_asset_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// Parsed request parameters, inserted as a request extension.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RequestParams {
    /// Query and body merged into one object; body fields win.
    pub fn params(&self) -> Value {
        let mut merged: Map<String, Value> =
            self.query.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        if let Some(Value::Object(body)) = &self.body {
            for (key, value) in body {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }

    /// Copy safe to log: the access key query parameter is masked.
    pub fn redacted(&self) -> Self {
        let mut query = self.query.clone();
        if let Some(value) = query.get_mut(ACCESS_KEY_QUERY) {
            *value = REDACTED.to_string();
        }
        let body = self.body.clone().map(|mut body| {
            if let Some(value) = body.get_mut(ACCESS_KEY_QUERY) {
                *value = Value::String(REDACTED.to_string());
            }
            body
        });
        Self { query, body }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.body {
            Some(Value::Object(body)) if body.contains_key(key) => body.get(key).cloned(),
            _ => self.query.get(key).map(|v| Value::String(v.clone())),
        }
    }
}

/// Content-Security-Policy, HSTS and friends on every response.
pub async fn security_headers(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    let csp = format!("default-src 'self' {}", state.namespace);
    if let Ok(value) = HeaderValue::from_str(csp.trim_end()) {
        headers.insert(header::CONTENT_SECURITY_POLICY, value);
    }
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        HeaderName::from_static("x-dns-prefetch-control"),
        HeaderValue::from_static("off"),
    );
    response
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json") || value.contains("+json"))
        .unwrap_or(false)
}

/// Decode the query string and JSON body into [`RequestParams`].
pub async fn parse_params(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let too_large = || {
        ApiError::PayloadTooLarge(format!("Request body exceeds {} bytes", state.max_body_bytes))
    };

    let declared_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > state.max_body_bytes) {
        return Err(too_large());
    }

    let Query(query) = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map_err(|e| ApiError::bad_request(format!("Malformed query string: {}", e)))?;

    let json = is_json(&request);
    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, state.max_body_bytes).await.map_err(|_| too_large())?;

    let body = if json && !bytes.is_empty() {
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::bad_request(format!("Malformed JSON body: {}", e)))?;
        Some(value)
    } else {
        None
    };

    parts.extensions.insert(RequestParams { query, body });
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<ClientAddr>>()
        .map(|ConnectInfo(ClientAddr(addr))| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Token bucket per client address.
pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(&request);
    state
        .rate_limiter
        .check_rate_limit(&key)
        .await
        .map_err(|retry_after| ApiError::TooManyRequests { retry_after })?;
    Ok(next.run(request).await)
}

/// Request, parameter, query and body logging inside a per-request span.
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let client = client_key(&request);
    let span = request_span!(request.method(), request.uri().path(), client = %client);

    async move {
        if let Some(params) = request.extensions().get::<RequestParams>() {
            let params = params.redacted();
            trace!(
                query = ?params.query,
                body = ?params.body,
                params = %params.params(),
                "Request parameters"
            );
        }
        debug!("Request received");

        let response = next.run(request).await;
        debug!(status = response.status().as_u16(), "Request completed");
        response
    }
    .instrument(span)
    .await
}

fn header_key(request: &Request) -> Option<&str> {
    request.headers().get(ACCESS_KEY_HEADER).and_then(|value| value.to_str().ok())
}

fn query_key(request: &Request) -> Option<String> {
    match request.extensions().get::<RequestParams>() {
        Some(params) => params.query.get(ACCESS_KEY_QUERY).cloned(),
        None => Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(mut query)| query.remove(ACCESS_KEY_QUERY)),
    }
}

/// Whether the request carries the access key in the header or the query
/// string, or targets an allow-listed static asset. Each source is checked
/// on its own.
pub fn is_authorized(state: &ApiState, request: &Request) -> bool {
    header_key(request).is_some_and(|key| state.access_key.matches(key))
        || query_key(request).is_some_and(|key| state.access_key.matches(&key))
        || state.is_static_asset(request.uri().path())
}

/// Reject requests without a valid access key with the fixed 401 body.
pub async fn access_gate(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    if is_authorized(&state, &request) {
        return next.run(request).await;
    }

    if request.uri().path() != PING_PATH {
        info!(path = %request.uri().path(), "No or invalid client access key");
    }
    ApiError::unauthorized().into_response()
}
