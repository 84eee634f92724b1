//! Billing engine: wiring for the reconciliation services

use std::sync::Arc;

use glowlab_shared::PaymentMethod;

use crate::credits::{CreditService, RedeemConfig};
use crate::error::{BillingError, BillingResult};
use crate::ledger::Ledger;
use crate::orders::OrderCoordinator;
use crate::providers::{AdapterRegistry, WebhookSignature};
use crate::reconcile::{Outcome, Reconciler};

/// All engine services over one injected ledger and adapter set
#[derive(Clone)]
pub struct BillingEngine {
    pub orders: OrderCoordinator,
    pub reconciler: Reconciler,
    pub credits: CreditService,
    adapters: AdapterRegistry,
}

impl BillingEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        adapters: AdapterRegistry,
        return_url: String,
        redeem: RedeemConfig,
    ) -> Self {
        let credits = CreditService::new(ledger.clone(), redeem);
        let orders = OrderCoordinator::new(ledger.clone(), adapters.clone(), return_url);
        let reconciler = Reconciler::new(ledger, adapters.clone(), credits.clone());
        Self {
            orders,
            reconciler,
            credits,
            adapters,
        }
    }

    /// Webhook entrypoint: verify the provider signature, then run the
    /// reconciliation state machine on the event.
    pub async fn handle_webhook(
        &self,
        method: PaymentMethod,
        raw_body: &[u8],
        sig: &WebhookSignature<'_>,
    ) -> BillingResult<Outcome> {
        let adapter = self.adapters.get(method).ok_or_else(|| {
            BillingError::Config(format!("payment method {} is not configured", method))
        })?;

        let event = adapter.verify_webhook(raw_body, sig)?;

        tracing::info!(
            method = %method,
            trade_no = %event.trade_no,
            event_id = ?event.event_id,
            "Webhook event verified"
        );

        self.reconciler.apply_event(method, event).await
    }
}
