//! Airwallex provider adapter
//!
//! Airwallex authenticates with a short-lived bearer token obtained from a
//! login endpoint; the token is cached in-process and refreshed before it
//! expires. Webhooks are signed with HMAC-SHA256 over `timestamp + body`.
//! There is no synchronous status query: confirmation is webhook-only.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;

use glowlab_shared::{Order, PaymentMethod};

use crate::error::{BillingError, BillingResult};
use crate::providers::{
    digests_match, IntentRequest, PaymentEvent, PaymentEventKind, ProviderAdapter, ProviderIntent,
    StatusProbe, WebhookSignature,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.airwallex.com/api/v1";
const HOSTED_CHECKOUT_BASE: &str = "https://checkout.airwallex.com/#/standalone/checkout";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Airwallex tokens live 30 minutes; refresh with headroom
const TOKEN_TTL: Duration = Duration::from_secs(25 * 60);

/// Configuration for the Airwallex adapter
#[derive(Debug, Clone)]
pub struct AirwallexConfig {
    pub client_id: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

impl AirwallexConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            client_id: std::env::var("AIRWALLEX_CLIENT_ID")
                .map_err(|_| BillingError::Config("AIRWALLEX_CLIENT_ID not set".to_string()))?,
            api_key: std::env::var("AIRWALLEX_API_KEY")
                .map_err(|_| BillingError::Config("AIRWALLEX_API_KEY not set".to_string()))?,
            webhook_secret: std::env::var("AIRWALLEX_WEBHOOK_SECRET").map_err(|_| {
                BillingError::Config("AIRWALLEX_WEBHOOK_SECRET not set".to_string())
            })?,
            api_base: std::env::var("AIRWALLEX_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        })
    }
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
}

/// Airwallex adapter
pub struct AirwallexAdapter {
    http: reqwest::Client,
    config: AirwallexConfig,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct AirwallexEvent {
    #[serde(default)]
    id: Option<String>,
    name: String,
    data: AirwallexEventData,
}

#[derive(Debug, Deserialize)]
struct AirwallexEventData {
    object: AirwallexEventObject,
}

#[derive(Debug, Deserialize)]
struct AirwallexEventObject {
    #[serde(default)]
    merchant_order_id: Option<String>,
}

impl AirwallexAdapter {
    pub fn new(config: AirwallexConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(AirwallexConfig::from_env()?)
    }

    /// Get a bearer token, reusing the cached one while it is fresh
    async fn access_token(&self) -> BillingResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.fetched_at.elapsed() < TOKEN_TTL {
                    return Ok(cached.token.clone());
                }
            }
        }

        let response = self
            .http
            .post(format!("{}/authentication/login", self.config.api_base))
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            if status.is_server_error() {
                return Err(BillingError::ProviderUnavailable(format!(
                    "Airwallex auth returned {}",
                    status
                )));
            }
            return Err(BillingError::Provider(format!(
                "Airwallex auth failed with {}",
                status
            )));
        }

        let login: LoginResponse = response.json().await?;

        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            token: login.token.clone(),
            fetched_at: Instant::now(),
        });

        Ok(login.token)
    }
}

#[async_trait]
impl ProviderAdapter for AirwallexAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Airwallex
    }

    async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!("{}/pa/payment_intents/create", self.config.api_base))
            .bearer_auth(&token)
            .json(&serde_json::json!({
                // request_id doubles as the idempotency key; retrying the same
                // trade number returns the original intent
                "request_id": req.trade_no,
                "amount": req.amount_cents as f64 / 100.0,
                "currency": "USD",
                "merchant_order_id": req.trade_no,
                "metadata": {
                    "trade_no": req.trade_no,
                    "credits": req.credits.to_string(),
                },
                "return_url": format!("{}/?payment=success&order_id={}", req.return_url, req.trade_no),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BillingError::ProviderUnavailable(format!(
                    "Airwallex intent creation returned {}",
                    status
                )));
            }
            return Err(BillingError::Provider(format!(
                "Airwallex payment intent failed {}: {}",
                status, body
            )));
        }

        let intent: PaymentIntentResponse = response.json().await?;

        tracing::info!(
            trade_no = %req.trade_no,
            intent_id = %intent.id,
            "Created Airwallex payment intent"
        );

        let redirect_url = format!(
            "{}?intent_id={}&client_secret={}",
            HOSTED_CHECKOUT_BASE, intent.id, intent.client_secret
        );

        Ok(ProviderIntent {
            provider_ref: intent.id,
            redirect_url,
        })
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<PaymentEvent> {
        let provided = sig.signature.ok_or(BillingError::SignatureInvalid)?;
        let timestamp = sig.timestamp.ok_or(BillingError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(timestamp.as_bytes());
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        if !digests_match(expected.as_bytes(), provided.as_bytes()) {
            return Err(BillingError::SignatureInvalid);
        }

        let event: AirwallexEvent = serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::Provider(format!("Unparseable Airwallex event: {}", e)))?;

        let kind = match event.name.as_str() {
            "payment_intent.succeeded" => PaymentEventKind::Completed,
            "payment_intent.cancelled" => PaymentEventKind::Failed,
            other => return Err(BillingError::WebhookEventNotSupported(other.to_string())),
        };

        let trade_no = event.data.object.merchant_order_id.ok_or_else(|| {
            BillingError::Provider("Airwallex event missing merchant_order_id".to_string())
        })?;

        Ok(PaymentEvent {
            trade_no,
            kind,
            event_id: event.id,
        })
    }

    /// Airwallex offers no checkout-status poll usable here; manual
    /// confirmation must not trust the caller, so it is rejected upstream.
    async fn query_status(&self, _order: &Order) -> BillingResult<StatusProbe> {
        Ok(StatusProbe::Unsupported)
    }
}
