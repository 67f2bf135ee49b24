mod health;
mod validate;

pub use health::*;
pub use validate::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::middleware::enforce_rate_limit;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let limited = Router::new()
        .route("/licenses/validate", post(validate_license))
        .route_layer(middleware::from_fn_with_state(state, enforce_rate_limit));

    Router::new().route("/health", get(health)).merge(limited)
}
