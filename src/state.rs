use std::sync::Arc;

use crate::config::{Config, Environment};
use crate::crypto::ResponseSigner;
use crate::email::Notifier;
use crate::payments::StripeWebhookVerifier;
use crate::provisioning::ProvisioningService;
use crate::ratelimit::RateLimiter;
use crate::storage::Storage;
use crate::validation::ValidationService;

/// How inbound Stripe webhooks are authenticated.
#[derive(Debug, Clone)]
pub enum WebhookVerification {
    Enforced(Arc<StripeWebhookVerifier>),
    /// Test-mode bypass; rejected by config validation in production
    Skipped,
    /// No secret configured: webhooks fail with 500 rather than being trusted
    Unconfigured,
}

impl WebhookVerification {
    pub fn from_config(config: &Config) -> Self {
        if config.webhook_skip_verification {
            tracing::warn!("Stripe webhook signature verification is DISABLED");
            return WebhookVerification::Skipped;
        }
        match &config.stripe_webhook_secret {
            Some(secret) => WebhookVerification::Enforced(Arc::new(StripeWebhookVerifier::new(secret))),
            None => WebhookVerification::Unconfigured,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub validation: ValidationService,
    pub provisioning: Arc<ProvisioningService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub webhook_verification: WebhookVerification,
    pub environment: Environment,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(config: &Config, storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        let signer = ResponseSigner::from_config(config.hmac_secret.as_deref());

        Self {
            validation: ValidationService::new(storage.clone(), signer),
            provisioning: Arc::new(ProvisioningService::new(
                storage.clone(),
                notifier,
                config.license_key_prefix.clone(),
            )),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window,
            )),
            webhook_verification: WebhookVerification::from_config(config),
            environment: config.environment,
            trust_proxy_headers: config.trust_proxy_headers,
            storage,
        }
    }
}
