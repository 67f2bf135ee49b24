use axum::{extract::State, http::StatusCode};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::extractors::Json;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub environment: String,
    pub database: &'static str,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, database) = match state.storage.ping() {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: database,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            environment: state.environment.to_string(),
            database,
        }),
    )
}
