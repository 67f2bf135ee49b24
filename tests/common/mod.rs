//! Shared fixtures for the HTTP integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, Response},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};

pub use license_cloud::config::{Config, Environment, StorageBackend};
pub use license_cloud::email::{EmailError, Notifier};
pub use license_cloud::models::{Customer, License, LicenseStatus};
pub use license_cloud::state::AppState;
pub use license_cloud::storage::{MemoryStorage, Storage};

pub const TEST_HMAC_SECRET: &str = "test-hmac-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const TEST_CLIENT: &str = "192.0.2.10:40000";

/// Notifier that records every license key it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn license_issued(&self, _: &Customer, license: &License) -> Result<(), EmailError> {
        self.sent.lock().push(license.key.clone());
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        environment: Environment::Test,
        storage_backend: StorageBackend::Memory,
        database_path: PathBuf::from("unused.db"),
        hmac_secret: Some(TEST_HMAC_SECRET.into()),
        stripe_webhook_secret: Some(TEST_WEBHOOK_SECRET.into()),
        webhook_skip_verification: false,
        rate_limit_requests: 10,
        rate_limit_window: Duration::from_secs(60),
        trust_proxy_headers: false,
        request_timeout: Duration::from_secs(60),
        license_key_prefix: "LIC".into(),
        resend_api_key: None,
        email_from: "licenses@example.com".into(),
        email_webhook_url: None,
    }
}

pub struct TestContext {
    pub state: AppState,
    pub storage: Arc<dyn Storage>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn create_test_context_with(config: &Config, storage: Arc<dyn Storage>) -> TestContext {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(config, storage.clone(), notifier.clone());
    TestContext {
        state,
        storage,
        notifier,
    }
}

pub fn create_test_context() -> TestContext {
    create_test_context_with(&test_config(), Arc::new(MemoryStorage::new()))
}

pub fn test_app(state: AppState) -> Router {
    license_cloud::handlers::app(state, Duration::from_secs(60))
}

pub fn create_test_customer(storage: &dyn Storage, email: &str) -> Customer {
    let now = Utc::now().timestamp();
    let customer = Customer {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: Some("Test Customer".into()),
        country: Some("US".into()),
        external_customer_ref: None,
        created_at: now,
        updated_at: now,
    };
    storage.save_customer(&customer).unwrap();
    customer
}

pub fn create_test_license(
    storage: &dyn Storage,
    customer_id: &str,
    key: &str,
    status: LicenseStatus,
    version: &str,
) -> License {
    let now = Utc::now().timestamp();
    let license = License {
        id: uuid::Uuid::new_v4().to_string(),
        key: key.to_string(),
        customer_id: customer_id.to_string(),
        product_id: "p1".into(),
        product_name: "Test Product".into(),
        version: version.to_string(),
        status,
        price_paid: 1999,
        currency: "usd".into(),
        purchase_session_ref: String::new(),
        created_at: now,
        updated_at: now,
    };
    storage.save_license(&license).unwrap();
    license
}

fn connect_info(client: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(client.parse().unwrap())
}

/// A JSON POST as it arrives from a connected client.
pub fn post_json(uri: &str, body: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .extension(connect_info(client))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn validate_request(license_key: &str, app_version: &str) -> Request<Body> {
    post_json(
        "/v1/licenses/validate",
        &json!({ "license_key": license_key, "app_version": app_version }).to_string(),
        TEST_CLIENT,
    )
}

/// A `checkout.session.completed` event for `email`.
pub fn checkout_completed_event(session_id: &str, email: &str, metadata: Value) -> Value {
    json!({
        "id": format!("evt_{}", session_id),
        "object": "event",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "customer": "cus_test_1",
                "customer_details": {
                    "email": email,
                    "name": "Ada Lovelace",
                    "address": { "country": "GB" }
                },
                "customer_email": null,
                "amount_total": 1999,
                "currency": "usd",
                "payment_status": "paid",
                "metadata": metadata
            }
        }
    })
}

pub fn signed_webhook_request(payload: &str, timestamp: i64) -> Request<Body> {
    let header =
        license_cloud::payments::signature_header(TEST_WEBHOOK_SECRET, payload.as_bytes(), timestamp)
            .unwrap();
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", header)
        .extension(connect_info(TEST_CLIENT))
        .body(Body::from(payload.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
