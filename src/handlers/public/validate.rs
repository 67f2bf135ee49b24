use axum::extract::State;
use serde::Deserialize;

use crate::error::Result;
use crate::extractors::Json;
use crate::state::AppState;
use crate::validation::SignedVerdict;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub license_key: String,
    /// Empty is answered with "invalid version format", not a 400
    #[serde(default)]
    pub app_version: String,
}

pub async fn validate_license(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<SignedVerdict>> {
    let verdict = state
        .validation
        .validate(&request.license_key, &request.app_version)?;

    tracing::info!(
        valid = verdict.valid,
        message = %verdict.message,
        app_version = %request.app_version,
        "License validation"
    );

    Ok(Json(verdict))
}
