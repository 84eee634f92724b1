//! Stripe provider adapter
//!
//! Checkout sessions are created in payment mode through async-stripe.
//! Webhook signatures are verified manually with HMAC-SHA256 (workaround for
//! async-stripe API version incompatibility with current event payloads).

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    CheckoutSessionStatus, Client, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
};

use glowlab_shared::{Order, PaymentMethod};

use crate::error::{BillingError, BillingResult};
use crate::providers::{
    digests_match, IntentRequest, PaymentEvent, PaymentEventKind, ProviderAdapter, ProviderIntent,
    StatusProbe, WebhookSignature,
};

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between the signature timestamp and now
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Configuration for the Stripe adapter
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
        })
    }
}

/// Stripe adapter
pub struct StripeAdapter {
    client: Client,
    config: StripeConfig,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Parse a `stripe-signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`
fn parse_signature_header(header: &str) -> Option<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, candidates))
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent> {
        let success_url = format!(
            "{}/?payment=success&order_id={}",
            req.return_url, req.trade_no
        );
        let cancel_url = format!(
            "{}/?payment=cancel&order_id={}",
            req.return_url, req.trade_no
        );

        let mut metadata = HashMap::new();
        metadata.insert("trade_no".to_string(), req.trade_no.to_string());
        metadata.insert("credits".to_string(), req.credits.to_string());

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: stripe::Currency::USD,
                unit_amount: Some(req.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: format!("Glowlab - {} Credits", req.credits),
                    description: Some(format!("Recharge {} credits for Glowlab", req.credits)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![line_item]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params).await?;

        let redirect_url = session.url.ok_or_else(|| {
            BillingError::Provider("Stripe returned a session without a URL".to_string())
        })?;

        tracing::info!(
            trade_no = %req.trade_no,
            session_id = %session.id,
            amount_cents = req.amount_cents,
            "Created Stripe checkout session"
        );

        Ok(ProviderIntent {
            provider_ref: session.id.to_string(),
            redirect_url,
        })
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<PaymentEvent> {
        let header = sig.signature.ok_or(BillingError::SignatureInvalid)?;
        let (timestamp, candidates) =
            parse_signature_header(header).ok_or(BillingError::SignatureInvalid)?;

        let skew = (chrono::Utc::now().timestamp() - timestamp).abs();
        if skew > SIGNATURE_TOLERANCE_SECS {
            return Err(BillingError::SignatureInvalid);
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        let matched = candidates
            .iter()
            .any(|candidate| digests_match(expected.as_bytes(), candidate.as_bytes()));
        if !matched {
            return Err(BillingError::SignatureInvalid);
        }

        let event: StripeEvent = serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::Provider(format!("Unparseable Stripe event: {}", e)))?;

        let kind = match event.type_.as_str() {
            "checkout.session.completed" => PaymentEventKind::Completed,
            "checkout.session.expired" => PaymentEventKind::Failed,
            other => return Err(BillingError::WebhookEventNotSupported(other.to_string())),
        };

        let trade_no = event
            .data
            .object
            .metadata
            .get("trade_no")
            .cloned()
            .ok_or_else(|| {
                BillingError::Provider("Stripe event missing trade_no metadata".to_string())
            })?;

        Ok(PaymentEvent {
            trade_no,
            kind,
            event_id: Some(event.id),
        })
    }

    async fn query_status(&self, order: &Order) -> BillingResult<StatusProbe> {
        let Some(provider_ref) = order.provider_ref.as_deref() else {
            // Intent creation never recorded a session; the webhook is the
            // only remaining confirmation path.
            return Ok(StatusProbe::Pending);
        };

        let session_id = provider_ref
            .parse::<CheckoutSessionId>()
            .map_err(|e| BillingError::Provider(format!("Invalid session ID: {}", e)))?;

        let session = CheckoutSession::retrieve(&self.client, &session_id, &[]).await?;

        Ok(match session.payment_status {
            CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired => {
                StatusProbe::Paid
            }
            CheckoutSessionPaymentStatus::Unpaid => {
                if session.status == Some(CheckoutSessionStatus::Expired) {
                    StatusProbe::Failed
                } else {
                    StatusProbe::Pending
                }
            }
        })
    }
}
