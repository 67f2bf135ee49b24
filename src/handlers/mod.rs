pub mod public;
pub mod webhooks;

use std::time::Duration;

use axum::{
    Router,
    http::{Method, StatusCode, header::CONTENT_TYPE},
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::state::AppState;

/// The full HTTP application, versioned under `/v1`.
pub fn app(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let v1 = Router::new()
        .merge(public::router(state.clone()))
        .merge(webhooks::router(state.clone()));

    Router::new()
        .nest("/v1", v1)
        .layer(timeout_layer(request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Requests running past `timeout` are answered with 408.
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}
