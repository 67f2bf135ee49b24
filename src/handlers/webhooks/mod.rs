mod stripe;

pub use stripe::*;

use axum::{Router, extract::DefaultBodyLimit, middleware, routing::post};

use crate::middleware::enforce_rate_limit;
use crate::state::AppState;

/// Stripe payloads are small; anything larger is refused before parsing.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/stripe",
            post(handle_stripe_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(state, enforce_rate_limit))
}
