//! License delivery email.
//!
//! Supports three modes:
//! 1. POST to a webhook URL (for DIY email delivery)
//! 2. Send via Resend API (when an API key is configured)
//! 3. Disabled (no email sent, log only)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Customer, License};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email service returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Out-of-band delivery of a freshly issued license to its owner.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn license_issued(&self, customer: &Customer, license: &License)
    -> Result<(), EmailError>;
}

/// Result of attempting to deliver a license email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    Sent,
    WebhookCalled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeliveryMode {
    Webhook(String),
    Resend { api_key: String },
    Disabled,
}

/// Webhook payload sent when `EMAIL_WEBHOOK_URL` is configured.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: &'static str,
    pub email: &'a str,
    pub license_key: &'a str,
    pub product_name: &'a str,
    pub amount: i64,
    pub currency: &'a str,
    pub customer_name: Option<&'a str>,
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Format minor currency units for humans, e.g. `$12.34` or `12.34 NOK`.
pub fn format_price(amount_minor: i64, currency: &str) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    let amount = format!("{}{}.{:02}", sign, abs / 100, abs % 100);

    match currency.to_uppercase().as_str() {
        "USD" => format!("${}", amount),
        "EUR" => format!("€{}", amount),
        "GBP" => format!("£{}", amount),
        other => format!("{} {}", amount, other),
    }
}

struct LicenseEmail {
    subject: String,
    text: String,
    html: String,
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn render_license_email(customer: &Customer, license: &License) -> LicenseEmail {
    let greeting = customer.first_name().unwrap_or("there");
    let price = format_price(license.price_paid, &license.currency);

    let subject = format!("Your {} license key", license.product_name);
    let text = format!(
        "Hello {},\n\nThank you for purchasing {}! Your purchase has been processed successfully.\n\nLICENSE DETAILS\nLicense Key: {}\nProduct: {} ({})\nAmount Paid: {}\n\nGETTING STARTED\nOpen the app, go to Settings > License and enter your license key: {}\n\nIf you have any questions, reply to this email.",
        greeting,
        license.product_name,
        license.key,
        license.product_name,
        license.version,
        price,
        license.key
    );
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Hello {},</h2>
<p>Thank you for purchasing <strong>{}</strong>! Your purchase has been processed successfully.</p>
<div style="background: #f5f5f5; padding: 20px; border-radius: 8px; text-align: center; margin-bottom: 24px;">
<code style="font-size: 24px; font-weight: bold; letter-spacing: 2px; color: #333;">{}</code>
</div>
<p><strong>Product:</strong> {} ({})<br><strong>Amount paid:</strong> {}</p>
<p>Open the app, go to <strong>Settings &gt; License</strong> and enter the key above.</p>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">If you have any questions, reply to this email.</p>
</body>
</html>"#,
        html_escape(greeting),
        html_escape(&license.product_name),
        html_escape(&license.key),
        html_escape(&license.product_name),
        html_escape(&license.version),
        html_escape(&price)
    );

    LicenseEmail {
        subject,
        text,
        html,
    }
}

/// Email service delivering license keys through a webhook or Resend.
#[derive(Clone)]
pub struct EmailService {
    mode: DeliveryMode,
    from_email: String,
    http_client: Client,
}

impl EmailService {
    /// Resolution order: webhook URL, then Resend API key, then disabled.
    pub fn new(
        resend_api_key: Option<String>,
        from_email: String,
        webhook_url: Option<String>,
    ) -> Self {
        let mode = match (webhook_url, resend_api_key) {
            (Some(url), _) if !url.is_empty() => DeliveryMode::Webhook(url),
            (_, Some(api_key)) if !api_key.is_empty() => DeliveryMode::Resend { api_key },
            _ => DeliveryMode::Disabled,
        };

        Self {
            mode,
            from_email,
            http_client: Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != DeliveryMode::Disabled
    }

    pub async fn send_license(
        &self,
        customer: &Customer,
        license: &License,
    ) -> Result<EmailSendResult, EmailError> {
        match &self.mode {
            DeliveryMode::Webhook(url) => self.call_webhook(url, customer, license).await,
            DeliveryMode::Resend { api_key } => {
                self.send_via_resend(api_key, customer, license).await
            }
            DeliveryMode::Disabled => {
                tracing::info!(
                    customer_id = %customer.id,
                    license_id = %license.id,
                    "Email delivery disabled, skipping license email"
                );
                Ok(EmailSendResult::Disabled)
            }
        }
    }

    async fn send_via_resend(
        &self,
        api_key: &str,
        customer: &Customer,
        license: &License,
    ) -> Result<EmailSendResult, EmailError> {
        let email = render_license_email(customer, license);
        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![&customer.email],
            subject: email.subject,
            text: email.text,
            html: email.html,
        };

        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to send request to Resend API"))?;

        if response.status().is_success() {
            let _result: ResendEmailResponse = response.json().await?;
            tracing::info!(
                customer_id = %customer.id,
                license_id = %license.id,
                "License email sent via Resend"
            );
            Ok(EmailSendResult::Sent)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Resend API returned error");
            Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn call_webhook(
        &self,
        webhook_url: &str,
        customer: &Customer,
        license: &License,
    ) -> Result<EmailSendResult, EmailError> {
        let payload = WebhookPayload {
            event: "license_issued",
            email: &customer.email,
            license_key: &license.key,
            product_name: &license.product_name,
            amount: license.price_paid,
            currency: &license.currency,
            customer_name: customer.name.as_deref(),
        };

        let response = self
            .http_client
            .post(webhook_url)
            .header("X-License-Cloud-Event", "license_issued")
            .json(&payload)
            .send()
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    webhook_url = %webhook_url,
                    "Failed to call email webhook"
                )
            })?;

        if response.status().is_success() {
            tracing::info!(
                webhook_url = %webhook_url,
                license_id = %license.id,
                "Email webhook called successfully"
            );
        } else {
            // Webhook receivers own their delivery; a non-2xx is theirs to debug.
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                webhook_url = %webhook_url,
                "Email webhook returned error"
            );
        }
        Ok(EmailSendResult::WebhookCalled)
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn license_issued(
        &self,
        customer: &Customer,
        license: &License,
    ) -> Result<(), EmailError> {
        self.send_license(customer, license).await.map(|_| ())
    }
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            DeliveryMode::Webhook(_) => "webhook",
            DeliveryMode::Resend { .. } => "resend",
            DeliveryMode::Disabled => "disabled",
        };
        f.debug_struct("EmailService")
            .field("mode", &mode)
            .field("from_email", &self.from_email)
            .finish()
    }
}
