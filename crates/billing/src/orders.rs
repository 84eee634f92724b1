//! Order coordinator: purchase intent creation
//!
//! The pending row is persisted *before* the provider is contacted, so a
//! crash mid-flight always leaves a traceable record and never an orphaned
//! provider session without one.

use std::sync::Arc;

use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use glowlab_shared::PaymentMethod;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{new_pending_order, Ledger};
use crate::plans;
use crate::providers::{generate_trade_no, AdapterRegistry, IntentRequest};

/// A freshly created order, ready for redirect
#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrder {
    pub trade_no: String,
    pub redirect_url: String,
}

/// Creates orders and owns the canonical trade identifier
#[derive(Clone)]
pub struct OrderCoordinator {
    ledger: Arc<dyn Ledger>,
    adapters: AdapterRegistry,
    /// Base URL the provider redirects the user back to after checkout
    return_url: String,
}

impl OrderCoordinator {
    pub fn new(ledger: Arc<dyn Ledger>, adapters: AdapterRegistry, return_url: String) -> Self {
        Self {
            ledger,
            adapters,
            return_url,
        }
    }

    /// Create a pending order and a provider checkout for it.
    ///
    /// The `(amount, credits)` pair must match a catalog plan; the plan's
    /// canonical values are what get persisted. If the ledger write fails the
    /// provider is never contacted. If the provider call fails the order
    /// stays `pending` for retry or expiry. Intent creation is retried with
    /// the *same* trade number; the trade number doubles as the
    /// provider-side idempotency key, so one user action can never mint two
    /// purchase intents.
    pub async fn create_order(
        &self,
        user_id: Option<Uuid>,
        amount_cents: i64,
        credits: i64,
        method: PaymentMethod,
    ) -> BillingResult<CreatedOrder> {
        let plan = plans::validate_plan(amount_cents, credits)?;

        let adapter = self
            .adapters
            .get(method)
            .ok_or_else(|| {
                BillingError::Config(format!("payment method {} is not configured", method))
            })?
            .clone();

        let trade_no = generate_trade_no(method);
        let order = new_pending_order(
            trade_no.clone(),
            user_id,
            plan.amount_cents,
            plan.credits,
            method,
        );

        self.ledger.insert_order(&order).await?;

        let request = IntentRequest {
            trade_no: &trade_no,
            amount_cents: plan.amount_cents,
            credits: plan.credits,
            return_url: &self.return_url,
        };

        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(2);
        let intent = RetryIf::spawn(
            strategy,
            || adapter.create_intent(request.clone()),
            |e: &BillingError| matches!(e, BillingError::ProviderUnavailable(_)),
        )
        .await
        .map_err(|e| {
            tracing::warn!(
                trade_no = %trade_no,
                method = %method,
                error = %e,
                "Provider intent creation failed; order left pending"
            );
            e
        })?;

        // Best effort: a missing ref degrades manual confirmation to the
        // webhook path but does not invalidate the order.
        if let Err(e) = self
            .ledger
            .set_provider_ref(&trade_no, &intent.provider_ref)
            .await
        {
            tracing::warn!(
                trade_no = %trade_no,
                error = %e,
                "Failed to record provider ref"
            );
        }

        tracing::info!(
            trade_no = %trade_no,
            method = %method,
            plan = %plan.id,
            amount_cents = plan.amount_cents,
            credits = plan.credits,
            "Created order"
        );

        Ok(CreatedOrder {
            trade_no,
            redirect_url: intent.redirect_url,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::providers::{
        PaymentEvent, ProviderAdapter, ProviderIntent, StatusProbe, WebhookSignature,
    };
    use async_trait::async_trait;
    use glowlab_shared::{Order, OrderStatus};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubAdapter {
        fail_intents: bool,
        calls: AtomicU32,
    }

    impl StubAdapter {
        fn new(fail_intents: bool) -> Self {
            Self {
                fail_intents,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Stripe
        }

        async fn create_intent(&self, req: IntentRequest<'_>) -> BillingResult<ProviderIntent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_intents {
                return Err(BillingError::Provider("checkout rejected".to_string()));
            }
            Ok(ProviderIntent {
                provider_ref: format!("sess_{}", req.trade_no),
                redirect_url: format!("https://pay.example/{}", req.trade_no),
            })
        }

        fn verify_webhook(
            &self,
            _raw_body: &[u8],
            _sig: &WebhookSignature<'_>,
        ) -> BillingResult<PaymentEvent> {
            Err(BillingError::SignatureInvalid)
        }

        async fn query_status(&self, _order: &Order) -> BillingResult<StatusProbe> {
            Ok(StatusProbe::Pending)
        }
    }

    fn coordinator(
        ledger: Arc<MemoryLedger>,
        adapter: Arc<StubAdapter>,
    ) -> OrderCoordinator {
        let adapters = AdapterRegistry::new().register(adapter);
        OrderCoordinator::new(ledger, adapters, "https://glowlab.app".to_string())
    }

    #[tokio::test]
    async fn creates_pending_order_with_provider_ref() {
        let ledger = Arc::new(MemoryLedger::new());
        let created = coordinator(ledger.clone(), Arc::new(StubAdapter::new(false)))
            .create_order(None, 199, 12, PaymentMethod::Stripe)
            .await
            .unwrap();

        assert!(created.trade_no.starts_with("GL"));
        let order = ledger
            .order_by_trade_no(&created.trade_no)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.credits, 12);
        assert_eq!(order.amount_cents, 199);
        assert_eq!(
            order.provider_ref.as_deref(),
            Some(format!("sess_{}", created.trade_no).as_str())
        );
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected_before_any_write() {
        let ledger = Arc::new(MemoryLedger::new());
        let adapter = Arc::new(StubAdapter::new(false));
        let err = coordinator(ledger, adapter.clone())
            .create_order(None, 123, 45, PaymentMethod::Stripe)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidPlan(_)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfigured_method_is_rejected() {
        let ledger = Arc::new(MemoryLedger::new());
        let err = coordinator(ledger, Arc::new(StubAdapter::new(false)))
            .create_order(None, 199, 12, PaymentMethod::Creem)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[tokio::test]
    async fn provider_failure_leaves_order_pending() {
        let ledger = Arc::new(MemoryLedger::new());
        let adapter = Arc::new(StubAdapter::new(true));
        let err = coordinator(ledger.clone(), adapter.clone())
            .create_order(Some(Uuid::new_v4()), 399, 30, PaymentMethod::Stripe)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));
        // Non-transient provider errors are not retried
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }
}
