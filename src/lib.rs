//! License issuing and validation service.
//!
//! Licenses are provisioned from Stripe checkout webhooks and validated by
//! the desktop client over `/v1/licenses/validate`, with every verdict
//! signed so the client can detect tampering.

pub mod config;
pub mod crypto;
pub mod email;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod provisioning;
pub mod ratelimit;
pub mod state;
pub mod storage;
pub mod util;
pub mod validation;
pub mod version;
