//! Creem provider adapter
//!
//! Creem checkouts are product-based: each recharge plan maps to a
//! pre-created Creem product id. Authentication is an `x-api-key` header;
//! webhooks are signed with HMAC-SHA256 over the raw body.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use glowlab_shared::{Order, PaymentMethod};

use crate::error::{BillingError, BillingResult};
use crate::providers::{
    digests_match, IntentRequest, PaymentEvent, PaymentEventKind, ProviderAdapter, ProviderIntent,
    StatusProbe, WebhookSignature,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.creem.io/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Creem product ids per recharge plan
#[derive(Debug, Clone)]
pub struct CreemProducts {
    pub plan_test: String,
    pub plan_12: String,
    pub plan_30: String,
}

impl CreemProducts {
    /// Get the product id for a plan by its credit count
    pub fn product_id_for_credits(&self, credits: i64) -> Option<&str> {
        match credits {
            1 => Some(&self.plan_test),
            12 => Some(&self.plan_12),
            30 => Some(&self.plan_30),
            _ => None,
        }
    }
}

/// Configuration for the Creem adapter
#[derive(Debug, Clone)]
pub struct CreemConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub products: CreemProducts,
    pub api_base: String,
}

impl CreemConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            api_key: std::env::var("CREEM_API_KEY")
                .map_err(|_| BillingError::Config("CREEM_API_KEY not set".to_string()))?,
            webhook_secret: std::env::var("CREEM_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("CREEM_WEBHOOK_SECRET not set".to_string()))?,
            products: CreemProducts {
                plan_test: std::env::var("CREEM_PRODUCT_TEST")
                    .map_err(|_| BillingError::Config("CREEM_PRODUCT_TEST not set".to_string()))?,
                plan_12: std::env::var("CREEM_PRODUCT_12")
                    .map_err(|_| BillingError::Config("CREEM_PRODUCT_12 not set".to_string()))?,
                plan_30: std::env::var("CREEM_PRODUCT_30")
                    .map_err(|_| BillingError::Config("CREEM_PRODUCT_30 not set".to_string()))?,
            },
            api_base: std::env::var("CREEM_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
        })
    }
}

/// Creem adapter
pub struct CreemAdapter {
    http: reqwest::Client,
    config: CreemConfig,
}

impl CreemAdapter {
    pub fn new(config: CreemConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(CreemConfig::from_env()?)
    }
}

#[derive(Debug, Deserialize)]
struct CreemCheckout {
    id: String,
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct CreemCheckoutStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreemEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "eventType")]
    event_type: String,
    object: CreemEventObject,
}

#[derive(Debug, Deserialize)]
struct CreemEventObject {
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[async_trait]
impl ProviderAdapter for CreemAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Creem
    }

    async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent> {
        let product_id = self
            .config
            .products
            .product_id_for_credits(req.credits)
            .ok_or_else(|| {
                BillingError::InvalidPlan(format!("no Creem product for {} credits", req.credits))
            })?;

        let response = self
            .http
            .post(format!("{}/checkouts", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .json(&serde_json::json!({
                "product_id": product_id,
                // Provider-side idempotency: replaying the same trade number
                // does not mint a second checkout
                "request_id": req.trade_no,
                "success_url": format!("{}/?payment=success&order_id={}", req.return_url, req.trade_no),
                "metadata": {
                    "trade_no": req.trade_no,
                    "credits": req.credits.to_string(),
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BillingError::ProviderUnavailable(format!(
                    "Creem checkout creation returned {}",
                    status
                )));
            }
            return Err(BillingError::Provider(format!(
                "Creem API error {}: {}",
                status, body
            )));
        }

        let checkout: CreemCheckout = response.json().await?;

        tracing::info!(
            trade_no = %req.trade_no,
            checkout_id = %checkout.id,
            "Created Creem checkout"
        );

        Ok(ProviderIntent {
            provider_ref: checkout.id,
            redirect_url: checkout.checkout_url,
        })
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<PaymentEvent> {
        let provided = sig.signature.ok_or(BillingError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        if !digests_match(expected.as_bytes(), provided.as_bytes()) {
            return Err(BillingError::SignatureInvalid);
        }

        let event: CreemEvent = serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::Provider(format!("Unparseable Creem event: {}", e)))?;

        let kind = match event.event_type.as_str() {
            "checkout.completed" => PaymentEventKind::Completed,
            "checkout.expired" => PaymentEventKind::Failed,
            other => return Err(BillingError::WebhookEventNotSupported(other.to_string())),
        };

        let trade_no = event
            .object
            .metadata
            .get("trade_no")
            .cloned()
            .ok_or_else(|| {
                BillingError::Provider("Creem event missing trade_no metadata".to_string())
            })?;

        Ok(PaymentEvent {
            trade_no,
            kind,
            event_id: event.id,
        })
    }

    async fn query_status(&self, order: &Order) -> BillingResult<StatusProbe> {
        let Some(provider_ref) = order.provider_ref.as_deref() else {
            return Ok(StatusProbe::Pending);
        };

        let response = self
            .http
            .get(format!("{}/checkouts/{}", self.config.api_base, provider_ref))
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            if status.is_server_error() {
                return Err(BillingError::ProviderUnavailable(format!(
                    "Creem status query returned {}",
                    status
                )));
            }
            return Err(BillingError::Provider(format!(
                "Creem status query returned {}",
                status
            )));
        }

        let checkout: CreemCheckoutStatus = response.json().await?;

        Ok(match checkout.status.as_str() {
            "completed" => StatusProbe::Paid,
            "expired" | "canceled" => StatusProbe::Failed,
            // "pending", "processing" and anything unrecognized stay pending;
            // never guess success
            _ => StatusProbe::Pending,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use glowlab_shared::OrderStatus;
    use time::OffsetDateTime;

    fn config(api_base: String) -> CreemConfig {
        CreemConfig {
            api_key: "creem_test_key".to_string(),
            webhook_secret: "creem_whsec".to_string(),
            products: CreemProducts {
                plan_test: "prod_test".to_string(),
                plan_12: "prod_twelve".to_string(),
                plan_30: "prod_thirty".to_string(),
            },
            api_base,
        }
    }

    fn order_with_ref(provider_ref: &str) -> Order {
        Order {
            trade_no: "CR1TEST".to_string(),
            user_id: None,
            amount_cents: 199,
            credits: 12,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Creem,
            provider_ref: Some(provider_ref.to_string()),
            created_at: OffsetDateTime::now_utc(),
            paid_at: None,
        }
    }

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn create_intent_posts_checkout() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkouts")
            .match_header("x-api-key", "creem_test_key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "product_id": "prod_twelve",
                "request_id": "CR1TEST",
            })))
            .with_status(200)
            .with_body(r#"{"id":"ch_123","checkout_url":"https://pay.creem.io/ch_123"}"#)
            .create_async()
            .await;

        let adapter = CreemAdapter::new(config(server.url())).unwrap();
        let intent = adapter
            .create_intent(IntentRequest {
                trade_no: "CR1TEST",
                amount_cents: 199,
                credits: 12,
                return_url: "https://glowlab.app",
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(intent.provider_ref, "ch_123");
        assert_eq!(intent.redirect_url, "https://pay.creem.io/ch_123");
    }

    #[tokio::test]
    async fn create_intent_5xx_is_provider_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/checkouts")
            .with_status(503)
            .create_async()
            .await;

        let adapter = CreemAdapter::new(config(server.url())).unwrap();
        let err = adapter
            .create_intent(IntentRequest {
                trade_no: "CR2TEST",
                amount_cents: 199,
                credits: 12,
                return_url: "https://glowlab.app",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn query_status_maps_completed_to_paid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/checkouts/ch_123")
            .match_header("x-api-key", "creem_test_key")
            .with_status(200)
            .with_body(r#"{"id":"ch_123","status":"completed"}"#)
            .create_async()
            .await;

        let adapter = CreemAdapter::new(config(server.url())).unwrap();
        let probe = adapter.query_status(&order_with_ref("ch_123")).await.unwrap();
        assert_eq!(probe, StatusProbe::Paid);
    }

    #[tokio::test]
    async fn query_status_without_ref_stays_pending() {
        let adapter = CreemAdapter::new(config("http://127.0.0.1:1".to_string())).unwrap();
        let mut order = order_with_ref("unused");
        order.provider_ref = None;
        let probe = adapter.query_status(&order).await.unwrap();
        assert_eq!(probe, StatusProbe::Pending);
    }

    #[test]
    fn webhook_round_trip() {
        let adapter = CreemAdapter::new(config("http://unused".to_string())).unwrap();
        let body = serde_json::json!({
            "id": "evt_cr_1",
            "eventType": "checkout.completed",
            "object": { "metadata": { "trade_no": "CR1TEST", "credits": "12" } }
        })
        .to_string();
        let signature = sign("creem_whsec", &body);

        let event = adapter
            .verify_webhook(
                body.as_bytes(),
                &WebhookSignature {
                    signature: Some(&signature),
                    timestamp: None,
                },
            )
            .unwrap();
        assert_eq!(event.trade_no, "CR1TEST");
        assert_eq!(event.kind, PaymentEventKind::Completed);

        let err = adapter
            .verify_webhook(
                body.as_bytes(),
                &WebhookSignature {
                    signature: Some("deadbeef"),
                    timestamp: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }
}
