//! End-to-end reconciliation tests over the in-memory ledger
//!
//! These exercise the engine exactly as the HTTP layer drives it: create an
//! order, then deliver webhook and/or manual confirmations in every order and
//! concurrency the real system can produce, asserting credits land exactly
//! once.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use glowlab_billing::{
    AdapterRegistry, BillingEngine, BillingError, BillingResult, IntentRequest, Ledger,
    MemoryLedger, Outcome, PaymentEvent, PaymentEventKind, ProviderAdapter, ProviderIntent,
    RedeemConfig, StatusProbe, WebhookSignature,
};
use glowlab_shared::{Order, OrderStatus, PaymentMethod};

const STATUS_PENDING: u8 = 0;
const STATUS_PAID: u8 = 1;
const STATUS_FAILED: u8 = 2;
const STATUS_UNSUPPORTED: u8 = 3;

/// Scripted adapter: webhook verification checks a shared-secret header and
/// parses `{"trade_no", "event"}` bodies; status queries report whatever the
/// test scripted.
struct FakeAdapter {
    method: PaymentMethod,
    status: AtomicU8,
}

impl FakeAdapter {
    fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            status: AtomicU8::new(STATUS_PENDING),
        }
    }

    fn script_status(&self, status: u8) {
        self.status.store(status, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent> {
        Ok(ProviderIntent {
            provider_ref: format!("ref_{}", req.trade_no),
            redirect_url: format!("https://pay.example/{}", req.trade_no),
        })
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<PaymentEvent> {
        if sig.signature != Some("valid") {
            return Err(BillingError::SignatureInvalid);
        }
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::Provider(e.to_string()))?;
        let trade_no = value["trade_no"].as_str().unwrap_or_default().to_string();
        let kind = match value["event"].as_str() {
            Some("completed") => PaymentEventKind::Completed,
            Some("failed") => PaymentEventKind::Failed,
            other => {
                return Err(BillingError::WebhookEventNotSupported(
                    other.unwrap_or("?").to_string(),
                ))
            }
        };
        Ok(PaymentEvent {
            trade_no,
            kind,
            event_id: Some("evt_fake".to_string()),
        })
    }

    async fn query_status(&self, _order: &Order) -> BillingResult<StatusProbe> {
        Ok(match self.status.load(Ordering::SeqCst) {
            STATUS_PAID => StatusProbe::Paid,
            STATUS_FAILED => StatusProbe::Failed,
            STATUS_UNSUPPORTED => StatusProbe::Unsupported,
            _ => StatusProbe::Pending,
        })
    }
}

struct Harness {
    engine: BillingEngine,
    ledger: Arc<MemoryLedger>,
    adapter: Arc<FakeAdapter>,
    user: Uuid,
}

fn harness(method: PaymentMethod) -> Harness {
    let user = Uuid::new_v4();
    let ledger = Arc::new(MemoryLedger::new().with_user(user, 0));
    let adapter = Arc::new(FakeAdapter::new(method));
    let adapters = AdapterRegistry::new().register(adapter.clone());
    let engine = BillingEngine::new(
        ledger.clone(),
        adapters,
        "https://glowlab.app".to_string(),
        RedeemConfig::disabled(),
    );
    Harness {
        engine,
        ledger,
        adapter,
        user,
    }
}

fn completed_webhook(trade_no: &str) -> Vec<u8> {
    serde_json::json!({ "trade_no": trade_no, "event": "completed" })
        .to_string()
        .into_bytes()
}

fn failed_webhook(trade_no: &str) -> Vec<u8> {
    serde_json::json!({ "trade_no": trade_no, "event": "failed" })
        .to_string()
        .into_bytes()
}

fn valid_sig() -> WebhookSignature<'static> {
    WebhookSignature {
        signature: Some("valid"),
        timestamp: None,
    }
}

async fn balance(h: &Harness) -> i64 {
    h.ledger.balance(h.user).await.unwrap().unwrap()
}

async fn order_status(h: &Harness, trade_no: &str) -> OrderStatus {
    h.ledger
        .order_by_trade_no(trade_no)
        .await
        .unwrap()
        .unwrap()
        .status
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn webhook_completes_order_and_credits_once() {
    let h = harness(PaymentMethod::Creem);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Creem)
        .await
        .unwrap();
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Pending);

    let outcome = h
        .engine
        .handle_webhook(
            PaymentMethod::Creem,
            &completed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Credited { credits: 12 });
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Completed);
    assert_eq!(balance(&h).await, 12);
}

#[tokio::test]
async fn manual_confirm_then_webhook_credits_once() {
    let h = harness(PaymentMethod::Stripe);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Stripe)
        .await
        .unwrap();

    // Client lands on the success page and confirms before the webhook
    h.adapter.script_status(STATUS_PAID);
    let manual = h
        .engine
        .reconciler
        .confirm_order(&created.trade_no, None)
        .await
        .unwrap();
    assert_eq!(manual, Outcome::Credited { credits: 12 });

    // The webhook arrives afterwards and must be a no-op success
    let webhook = h
        .engine
        .handle_webhook(
            PaymentMethod::Stripe,
            &completed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap();
    assert_eq!(webhook, Outcome::AlreadyCompleted { credits: 12 });
    assert_eq!(balance(&h).await, 12);
}

#[tokio::test]
async fn cancelled_order_fails_and_stays_failed() {
    let h = harness(PaymentMethod::Creem);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 399, 30, PaymentMethod::Creem)
        .await
        .unwrap();

    let outcome = h
        .engine
        .handle_webhook(
            PaymentMethod::Creem,
            &failed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Failed);
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Failed);

    // A later manual confirm reports the failure and changes nothing
    let err = h
        .engine
        .reconciler
        .confirm_order(&created.trade_no, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyFailed(_)));
    assert_eq!(balance(&h).await, 0);

    // Even a (replayed) completion webhook cannot resurrect it
    let err = h
        .engine
        .handle_webhook(
            PaymentMethod::Creem,
            &completed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyFailed(_)));
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Failed);
}

// ============================================================================
// Idempotence and races
// ============================================================================

#[tokio::test]
async fn duplicate_webhooks_credit_once() {
    let h = harness(PaymentMethod::Creem);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Creem)
        .await
        .unwrap();

    let body = completed_webhook(&created.trade_no);
    let first = h
        .engine
        .handle_webhook(PaymentMethod::Creem, &body, &valid_sig())
        .await
        .unwrap();
    let second = h
        .engine
        .handle_webhook(PaymentMethod::Creem, &body, &valid_sig())
        .await
        .unwrap();

    assert_eq!(first, Outcome::Credited { credits: 12 });
    assert_eq!(second, Outcome::AlreadyCompleted { credits: 12 });
    assert_eq!(first.credits(), second.credits());
    assert_eq!(balance(&h).await, 12);
}

#[tokio::test]
async fn concurrent_webhook_and_manual_confirm_credit_once() {
    let h = harness(PaymentMethod::Stripe);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Stripe)
        .await
        .unwrap();
    h.adapter.script_status(STATUS_PAID);

    let engine_a = h.engine.clone();
    let engine_b = h.engine.clone();
    let trade_a = created.trade_no.clone();
    let trade_b = created.trade_no.clone();

    let webhook = tokio::spawn(async move {
        engine_a
            .handle_webhook(PaymentMethod::Stripe, &completed_webhook(&trade_a), &valid_sig())
            .await
    });
    let manual = tokio::spawn(async move { engine_b.reconciler.confirm_order(&trade_b, None).await });

    let webhook = webhook.await.unwrap().unwrap();
    let manual = manual.await.unwrap().unwrap();

    // Exactly one winner; both observe the same credit count
    let credited = [webhook, manual]
        .iter()
        .filter(|o| matches!(o, Outcome::Credited { .. }))
        .count();
    assert_eq!(credited, 1);
    assert_eq!(webhook.credits(), Some(12));
    assert_eq!(manual.credits(), Some(12));
    assert_eq!(balance(&h).await, 12);
}

#[tokio::test]
async fn two_orders_for_one_user_both_credit() {
    let h = harness(PaymentMethod::Creem);
    let first = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Creem)
        .await
        .unwrap();
    let second = h
        .engine
        .orders
        .create_order(Some(h.user), 399, 30, PaymentMethod::Creem)
        .await
        .unwrap();

    let engine_a = h.engine.clone();
    let engine_b = h.engine.clone();
    let body_a = completed_webhook(&first.trade_no);
    let body_b = completed_webhook(&second.trade_no);

    let a = tokio::spawn(async move {
        engine_a
            .handle_webhook(PaymentMethod::Creem, &body_a, &valid_sig())
            .await
    });
    let b = tokio::spawn(async move {
        engine_b
            .handle_webhook(PaymentMethod::Creem, &body_b, &valid_sig())
            .await
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Different trade numbers proceed in parallel; neither increment is lost
    assert_eq!(balance(&h).await, 42);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn invalid_signature_changes_nothing() {
    let h = harness(PaymentMethod::Creem);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Creem)
        .await
        .unwrap();

    let err = h
        .engine
        .handle_webhook(
            PaymentMethod::Creem,
            &completed_webhook(&created.trade_no),
            &WebhookSignature {
                signature: Some("forged"),
                timestamp: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::SignatureInvalid));
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Pending);
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn unknown_order_is_reported_without_creating_rows() {
    let h = harness(PaymentMethod::Creem);

    let err = h
        .engine
        .reconciler
        .confirm_order("CR0000000000000XXXXX", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::OrderNotFound(_)));

    assert!(h
        .engine
        .reconciler
        .check_order("CR0000000000000XXXXX")
        .await
        .unwrap()
        .is_none());
    assert!(h
        .ledger
        .order_by_trade_no("CR0000000000000XXXXX")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn manual_confirm_is_rejected_when_provider_cannot_verify() {
    let h = harness(PaymentMethod::Airwallex);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Airwallex)
        .await
        .unwrap();
    h.adapter.script_status(STATUS_UNSUPPORTED);

    // A user cannot self-confirm an unpaid order on a webhook-only provider
    let err = h
        .engine
        .reconciler
        .confirm_order(&created.trade_no, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::VerificationUnsupported));
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Pending);
    assert_eq!(balance(&h).await, 0);

    // The webhook still completes it
    let outcome = h
        .engine
        .handle_webhook(
            PaymentMethod::Airwallex,
            &completed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Credited { credits: 12 });
}

#[tokio::test]
async fn manual_confirm_before_payment_reports_not_yet_paid() {
    let h = harness(PaymentMethod::Stripe);
    let created = h
        .engine
        .orders
        .create_order(Some(h.user), 199, 12, PaymentMethod::Stripe)
        .await
        .unwrap();

    let outcome = h
        .engine
        .reconciler
        .confirm_order(&created.trade_no, None)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::NotYetPaid);
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Pending);
    assert_eq!(balance(&h).await, 0);
}

// ============================================================================
// Anonymous orders
// ============================================================================

#[tokio::test]
async fn anonymous_order_credits_on_confirm_with_caller_id() {
    let h = harness(PaymentMethod::Stripe);
    let created = h
        .engine
        .orders
        .create_order(None, 199, 12, PaymentMethod::Stripe)
        .await
        .unwrap();

    // Webhook verifies the payment but has no user to credit
    let outcome = h
        .engine
        .handle_webhook(
            PaymentMethod::Stripe,
            &completed_webhook(&created.trade_no),
            &valid_sig(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::NotYetPaid);
    assert_eq!(order_status(&h, &created.trade_no).await, OrderStatus::Paid);

    // Manual confirm supplies the caller; the order's own user id would win
    // if it had one
    h.adapter.script_status(STATUS_PAID);
    let outcome = h
        .engine
        .reconciler
        .confirm_order(&created.trade_no, Some(h.user))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Credited { credits: 12 });
    assert_eq!(balance(&h).await, 12);
}
