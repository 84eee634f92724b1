//! Provider webhook routes
//!
//! One path per provider; each extracts that provider's signature headers.
//! A verified delivery is always acked with `{"received": true}`: the
//! reconciler's idempotence makes provider retries of an already-processed
//! event harmless, so a processing hiccup is logged rather than surfaced.
//! Only missing or invalid signatures are rejected.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use glowlab_billing::{BillingError, WebhookSignature};
use glowlab_shared::PaymentMethod;

use crate::{error::ApiError, state::AppState};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn handle(
    state: &AppState,
    method: PaymentMethod,
    sig: WebhookSignature<'_>,
    body: &[u8],
) -> Result<Json<Value>, ApiError> {
    tracing::info!(method = %method, body_len = body.len(), "Webhook received");

    match state.engine.handle_webhook(method, body, &sig).await {
        Ok(outcome) => {
            tracing::info!(method = %method, outcome = ?outcome, "Webhook processed");
        }
        Err(BillingError::SignatureInvalid) => {
            tracing::warn!(method = %method, "Webhook signature verification failed");
            return Err(ApiError::SignatureInvalid);
        }
        Err(BillingError::WebhookEventNotSupported(event)) => {
            tracing::debug!(method = %method, event = %event, "Ignoring webhook event type");
        }
        Err(e) => {
            // Verified but unprocessable (unknown order, terminal state, a
            // store hiccup). The provider's retry schedule will redeliver;
            // reprocessing is idempotent either way.
            tracing::warn!(method = %method, error = %e, "Webhook processing failed");
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// Handle Stripe webhook events
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let sig = WebhookSignature {
        signature: header(&headers, "stripe-signature"),
        timestamp: None,
    };
    handle(&state, PaymentMethod::Stripe, sig, &body).await
}

/// Handle Creem webhook events
pub async fn creem(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let sig = WebhookSignature {
        signature: header(&headers, "creem-signature"),
        timestamp: None,
    };
    handle(&state, PaymentMethod::Creem, sig, &body).await
}

/// Handle Airwallex webhook events
pub async fn airwallex(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let sig = WebhookSignature {
        signature: header(&headers, "x-signature"),
        timestamp: header(&headers, "x-timestamp"),
    };
    handle(&state, PaymentMethod::Airwallex, sig, &body).await
}
