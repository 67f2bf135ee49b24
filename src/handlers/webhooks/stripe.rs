use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::{StripeCheckoutSession, StripeWebhookEvent};
use crate::state::{AppState, WebhookVerification};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: &'static str,
}

const ACK: WebhookAck = WebhookAck { received: "true" };

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    match &state.webhook_verification {
        WebhookVerification::Enforced(verifier) => {
            let signature = headers
                .get("stripe-signature")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AppError::BadRequest("missing stripe-signature header".into()))?;

            verifier.verify(&body, signature).map_err(|e| {
                tracing::warn!(error = %e, "Webhook signature verification failed");
                AppError::BadRequest("invalid signature".into())
            })?;
        }
        WebhookVerification::Skipped => {
            tracing::debug!("Skipping webhook signature verification (test mode)");
        }
        WebhookVerification::Unconfigured => {
            return Err(AppError::Internal("STRIPE_WEBHOOK_SECRET is not configured".into()));
        }
    }

    let event: StripeWebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse Stripe webhook");
        AppError::BadRequest("invalid payload".into())
    })?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe event received");

    match event.event_type.as_str() {
        "checkout.session.completed" => handle_checkout_completed(&state, &event).await?,
        _ => {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Unhandled webhook event type"
            );
        }
    }

    Ok(Json(ACK))
}

/// Provision a license for a completed checkout.
async fn handle_checkout_completed(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::warn!(error = %e, event_id = %event.id, "Failed to parse checkout session");
            AppError::BadRequest("invalid checkout session".into())
        })?;

    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid, skipping provisioning"
        );
        return Ok(());
    }

    let purchase = session.to_purchase_event();
    let provisioned = state.provisioning.provision(&purchase).await.inspect_err(|e| {
        tracing::error!(error = %e, session_id = %session.id, "Failed to provision license");
    })?;

    tracing::info!(
        session_id = %session.id,
        customer_id = %provisioned.customer.id,
        license_id = %provisioned.license.id,
        created = provisioned.created,
        "Stripe checkout completed"
    );

    Ok(())
}
