//! Confirmation reconciler: the core state machine
//!
//! Both confirmation triggers (an inbound provider webhook and a
//! client-initiated confirm after redirect) run the same transition
//! sequence. The winner of the store-level claim applies the credits; the
//! loser observes `completed` and exits as a no-op success with the same
//! externally visible result.

use std::sync::Arc;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use glowlab_shared::{OrderStatus, PaymentMethod};

use crate::credits::CreditService;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{CompletionOutcome, Ledger};
use crate::providers::{AdapterRegistry, PaymentEvent, PaymentEventKind, StatusProbe};

/// Externally observable result of a confirmation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// This trigger won the transition and applied the credits
    Credited { credits: i64 },
    /// The order was already completed; idempotent no-op success
    AlreadyCompleted { credits: i64 },
    /// The provider has not confirmed payment yet
    NotYetPaid,
    /// The provider reported cancellation; the order is now failed
    Failed,
}

impl Outcome {
    /// Credits granted for this order, when known
    pub fn credits(&self) -> Option<i64> {
        match self {
            Outcome::Credited { credits } | Outcome::AlreadyCompleted { credits } => {
                Some(*credits)
            }
            _ => None,
        }
    }
}

/// The reconciliation state machine
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    adapters: AdapterRegistry,
    credits: CreditService,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn Ledger>, adapters: AdapterRegistry, credits: CreditService) -> Self {
        Self {
            ledger,
            adapters,
            credits,
        }
    }

    /// Process a verified provider event (webhook trigger).
    ///
    /// The event has already passed signature verification at the adapter
    /// boundary; unsigned or mis-signed payloads never reach this point.
    pub async fn apply_event(
        &self,
        method: PaymentMethod,
        event: PaymentEvent,
    ) -> BillingResult<Outcome> {
        let order = self
            .ledger
            .order_by_trade_no(&event.trade_no)
            .await?
            .ok_or_else(|| BillingError::OrderNotFound(event.trade_no.clone()))?;

        if order.payment_method != method {
            return Err(BillingError::InvalidInput(format!(
                "order {} belongs to {}, not {}",
                order.trade_no, order.payment_method, method
            )));
        }

        if let Some(outcome) = short_circuit(&order.trade_no, order.status, order.credits)? {
            return Ok(outcome);
        }

        match event.kind {
            PaymentEventKind::Failed => {
                self.ledger.mark_failed(&order.trade_no).await?;
                tracing::info!(
                    trade_no = %order.trade_no,
                    event_id = ?event.event_id,
                    "Order failed per provider event"
                );
                Ok(Outcome::Failed)
            }
            PaymentEventKind::Completed => match order.user_id {
                Some(user_id) => self.complete(&order.trade_no, user_id).await,
                None => {
                    // Anonymous order: payment is verified but there is no
                    // balance to credit yet. Record the payment and wait for
                    // a confirm call carrying the user.
                    self.ledger.mark_paid(&order.trade_no).await?;
                    tracing::warn!(
                        trade_no = %order.trade_no,
                        "Verified payment for anonymous order; awaiting user attribution"
                    );
                    Ok(Outcome::NotYetPaid)
                }
            },
        }
    }

    /// Client-initiated confirmation after a checkout redirect (manual
    /// trigger). The provider is always consulted; the caller's claim of
    /// payment is never trusted on its own.
    pub async fn confirm_order(
        &self,
        trade_no: &str,
        caller_user_id: Option<Uuid>,
    ) -> BillingResult<Outcome> {
        let order = self
            .ledger
            .order_by_trade_no(trade_no)
            .await?
            .ok_or_else(|| BillingError::OrderNotFound(trade_no.to_string()))?;

        if let Some(outcome) = short_circuit(&order.trade_no, order.status, order.credits)? {
            return Ok(outcome);
        }

        let adapter = self.adapters.get(order.payment_method).ok_or_else(|| {
            BillingError::Config(format!(
                "payment method {} is not configured",
                order.payment_method
            ))
        })?;

        // The status query is idempotent, so transient provider failures are
        // safe to retry with backoff.
        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(2);
        let probe = RetryIf::spawn(
            strategy,
            || adapter.query_status(&order),
            |e: &BillingError| matches!(e, BillingError::ProviderUnavailable(_)),
        )
        .await?;

        match probe {
            StatusProbe::Unsupported => Err(BillingError::VerificationUnsupported),
            StatusProbe::Pending => Ok(Outcome::NotYetPaid),
            StatusProbe::Failed => {
                self.ledger.mark_failed(&order.trade_no).await?;
                tracing::info!(trade_no = %order.trade_no, "Order failed per status query");
                Ok(Outcome::Failed)
            }
            StatusProbe::Paid => {
                let user_id = order.user_id.or(caller_user_id).ok_or_else(|| {
                    BillingError::InvalidInput(
                        "user id required to credit an anonymous order".to_string(),
                    )
                })?;
                self.complete(&order.trade_no, user_id).await
            }
        }
    }

    /// Read-only order status lookup
    pub async fn check_order(&self, trade_no: &str) -> BillingResult<Option<(OrderStatus, i64)>> {
        Ok(self
            .ledger
            .order_by_trade_no(trade_no)
            .await?
            .map(|order| (order.status, order.credits)))
    }

    async fn complete(&self, trade_no: &str, user_id: Uuid) -> BillingResult<Outcome> {
        match self.credits.apply_completion(trade_no, user_id).await? {
            CompletionOutcome::Credited { credits } => Ok(Outcome::Credited { credits }),
            // Lost the race; the winner already applied the credits
            CompletionOutcome::AlreadyCompleted { credits } => {
                Ok(Outcome::AlreadyCompleted { credits })
            }
            CompletionOutcome::AlreadyFailed => {
                Err(BillingError::AlreadyFailed(trade_no.to_string()))
            }
            CompletionOutcome::NotFound => Err(BillingError::OrderNotFound(trade_no.to_string())),
        }
    }
}

/// Terminal-state checks shared by both triggers: completed orders
/// short-circuit to the recorded result with no further mutation, failed
/// orders report the failure.
fn short_circuit(
    trade_no: &str,
    status: OrderStatus,
    credits: i64,
) -> BillingResult<Option<Outcome>> {
    match status {
        OrderStatus::Completed => {
            tracing::debug!(trade_no = %trade_no, "Order already completed");
            Ok(Some(Outcome::AlreadyCompleted { credits }))
        }
        OrderStatus::Failed => Err(BillingError::AlreadyFailed(trade_no.to_string())),
        OrderStatus::Pending | OrderStatus::Paid => Ok(None),
    }
}
