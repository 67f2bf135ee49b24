use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::state::AppState;
use crate::util::client_key;

/// Admit or reject the request against the per-client fixed window.
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(
        request.headers(),
        request.extensions(),
        state.trust_proxy_headers,
    );

    if !state.rate_limiter.allow(&key) {
        tracing::warn!(
            client = %key,
            path = %request.uri().path(),
            method = %request.method(),
            "Rate limit exceeded"
        );
        return AppError::RateLimited.into_response();
    }

    next.run(request).await
}
