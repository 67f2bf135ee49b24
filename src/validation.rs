//! License validation protocol.
//!
//! Every lookup that reaches storage produces a signed [`SignedVerdict`],
//! positive or negative. Only a missing key (request error) and a storage
//! failure (infrastructure error) surface as [`ValidationError`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::{ResponseSigner, SigningError};
use crate::storage::{Storage, StorageError};
use crate::version;

/// Outcome of a validation, with the exact message clients branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    Valid,
    NotFound,
    NotActive,
    InvalidVersionFormat,
    IncompatibleVersion,
}

impl VerdictReason {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerdictReason::Valid)
    }

    pub fn message(&self) -> &'static str {
        match self {
            VerdictReason::Valid => "license valid",
            VerdictReason::NotFound => "license not found",
            VerdictReason::NotActive => "license not active",
            VerdictReason::InvalidVersionFormat => "invalid version format",
            VerdictReason::IncompatibleVersion => "license version not compatible",
        }
    }
}

/// Wire form of a verdict, as returned by `/v1/licenses/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedVerdict {
    pub valid: bool,
    pub message: String,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("license_key is required")]
    MissingLicenseKey,

    #[error("failed to look up license: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to sign verdict: {0}")]
    Signing(#[from] SigningError),
}

#[derive(Clone)]
pub struct ValidationService {
    storage: Arc<dyn Storage>,
    signer: ResponseSigner,
}

impl ValidationService {
    pub fn new(storage: Arc<dyn Storage>, signer: ResponseSigner) -> Self {
        Self { storage, signer }
    }

    pub fn signer(&self) -> &ResponseSigner {
        &self.signer
    }

    /// Decide whether `license_key` entitles a client running `app_version`.
    pub fn validate(
        &self,
        license_key: &str,
        app_version: &str,
    ) -> Result<SignedVerdict, ValidationError> {
        let reason = self.decide(license_key, app_version)?;
        self.sign(reason)
    }

    fn decide(&self, license_key: &str, app_version: &str) -> Result<VerdictReason, ValidationError> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(ValidationError::MissingLicenseKey);
        }

        let Some(license) = self.storage.find_license_by_key(license_key)? else {
            tracing::warn!(license_key = %license_key, app_version = %app_version, "License not found");
            return Ok(VerdictReason::NotFound);
        };

        if !license.status.is_active() {
            tracing::info!(
                license_id = %license.id,
                status = %license.status,
                "License is not active"
            );
            return Ok(VerdictReason::NotActive);
        }

        match version::is_compatible(&license.version, app_version) {
            Ok(true) => Ok(VerdictReason::Valid),
            Ok(false) => {
                tracing::info!(
                    license_id = %license.id,
                    license_version = %license.version,
                    app_version = %app_version,
                    "License version not compatible with app version"
                );
                Ok(VerdictReason::IncompatibleVersion)
            }
            Err(e) => {
                tracing::info!(
                    license_id = %license.id,
                    license_version = %license.version,
                    app_version = %app_version,
                    error = %e,
                    "Invalid version format"
                );
                Ok(VerdictReason::InvalidVersionFormat)
            }
        }
    }

    fn sign(&self, reason: VerdictReason) -> Result<SignedVerdict, ValidationError> {
        let timestamp = Utc::now().timestamp();
        let valid = reason.is_valid();
        let message = reason.message();
        Ok(SignedVerdict {
            valid,
            message: message.to_string(),
            timestamp,
            signature: self.signer.sign(valid, message, timestamp)?,
        })
    }
}
