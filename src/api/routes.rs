use std::any::Any;

use axum::{
    body::Body,
    http::{Response, StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;

use super::error::ApiError;
use super::middleware::{
    access_gate, parse_params, rate_limit, security_headers, trace_requests, ApiState, PING_PATH,
};

/// `GET /ping`
pub async fn ping() -> Json<Value> {
    Json(json!({ "reply": "pong" }))
}

/// Structured 404 for every unmatched path.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("Cannot find {}", uri.path()))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Request handler panicked");
    ApiError::internal("Internal server error").into_response()
}

/// Wrap every route currently in `router` with the request pipeline.
///
/// `route_layer` only touches existing routes, which keeps unmatched paths
/// out of the gate: they reach the fallback as a 404, never a 401. Layers
/// added last run first.
fn with_pipeline(router: Router, state: &ApiState, gated: bool) -> Router {
    let router = if gated {
        router.route_layer(middleware::from_fn_with_state(state.clone(), access_gate))
    } else {
        router
    };

    router
        .route_layer(middleware::from_fn(trace_requests))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), parse_params))
}

/// Assemble the listener's router.
///
/// `service_routes` are always gated. `/ping` is gated only when the state
/// asks for it; either way it shares the rest of the pipeline.
pub fn build_router(state: ApiState, service_routes: Option<Router>) -> Router {
    let ping = Router::new().route(PING_PATH, get(ping));

    let (gated, open) = match (service_routes, state.ping_requires_access_key) {
        (Some(routes), true) => (Some(routes.merge(ping)), None),
        (Some(routes), false) => (Some(routes), Some(ping)),
        (None, true) => (Some(ping), None),
        (None, false) => (None, Some(ping)),
    };

    let mut router = Router::new();
    if let Some(gated) = gated {
        router = router.merge(with_pipeline(gated, &state, true));
    }
    if let Some(open) = open {
        router = router.merge(with_pipeline(open, &state, false));
    }

    router
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state, security_headers))
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Uniform JSON response.
pub fn respond<T: serde::Serialize>(status: StatusCode, body: T) -> axum::response::Response {
    (status, Json(body)).into_response()
}
