//! Payment provider adapters
//!
//! Each variant translates the generic intent/verify/query operations into
//! provider-specific HTTP calls. Provider types never cross this boundary;
//! callers see only the request/response shapes defined here.

mod airwallex;
mod creem;
mod stripe_adapter;

pub use airwallex::{AirwallexAdapter, AirwallexConfig};
pub use creem::{CreemAdapter, CreemConfig, CreemProducts};
pub use stripe_adapter::{StripeAdapter, StripeConfig};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use glowlab_shared::{Order, PaymentMethod};

use crate::error::BillingResult;

/// Request to create a provider checkout for one order
#[derive(Debug, Clone)]
pub struct IntentRequest<'a> {
    pub trade_no: &'a str,
    pub amount_cents: i64,
    pub credits: i64,
    /// Base URL the provider redirects back to after checkout
    pub return_url: &'a str,
}

/// Provider-side checkout created for an order
#[derive(Debug, Clone)]
pub struct ProviderIntent {
    /// Provider object id (checkout session / payment intent)
    pub provider_ref: String,
    /// Hosted checkout URL to redirect the user to
    pub redirect_url: String,
}

/// What a verified webhook says happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Completed,
    Failed,
}

/// A provider event that passed signature verification
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub trade_no: String,
    pub kind: PaymentEventKind,
    pub event_id: Option<String>,
}

/// Best-effort synchronous status probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusProbe {
    Paid,
    Pending,
    Failed,
    /// Provider has no synchronous query; confirmation is webhook-only
    Unsupported,
}

/// Raw signature material from webhook request headers
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookSignature<'a> {
    pub signature: Option<&'a str>,
    /// Providers that sign `timestamp + body` (Airwallex) send this separately
    pub timestamp: Option<&'a str>,
}

/// Polymorphic capability set over the supported payment providers
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Create a provider checkout with the trade number embedded in metadata
    /// so confirmation can look the order back up
    async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent>;

    /// Verify a provider-signed payload and translate it into a
    /// [`PaymentEvent`]. Fails with `SignatureInvalid` without touching state.
    fn verify_webhook(
        &self,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<PaymentEvent>;

    /// Synchronously ask the provider whether the order's checkout was paid
    async fn query_status(&self, order: &Order) -> BillingResult<StatusProbe>;
}

/// Adapter lookup by payment method
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.method(), adapter);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&method)
    }
}

const TRADE_SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRADE_SUFFIX_LEN: usize = 5;

/// Generate a fresh trade number: provider prefix, millisecond timestamp,
/// random uppercase suffix. E.g. `GL1733154083021X7K2M`.
pub fn generate_trade_no(method: PaymentMethod) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TRADE_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TRADE_SUFFIX_CHARSET.len());
            TRADE_SUFFIX_CHARSET[idx] as char
        })
        .collect();
    format!(
        "{}{}{}",
        method.trade_prefix(),
        chrono::Utc::now().timestamp_millis(),
        suffix
    )
}

/// Constant-time byte comparison for signature digests
pub(crate) fn digests_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_numbers_carry_provider_prefix() {
        let trade_no = generate_trade_no(PaymentMethod::Creem);
        assert!(trade_no.starts_with("CR"));
        assert!(trade_no.len() > 2 + 13);
    }

    #[test]
    fn trade_numbers_are_unique_enough() {
        let a = generate_trade_no(PaymentMethod::Stripe);
        let b = generate_trade_no(PaymentMethod::Stripe);
        assert_ne!(a, b);
    }

    #[test]
    fn digest_comparison_rejects_length_mismatch() {
        assert!(digests_match(b"abc", b"abc"));
        assert!(!digests_match(b"abc", b"abd"));
        assert!(!digests_match(b"abc", b"abcd"));
    }
}
