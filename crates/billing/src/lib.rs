//! Glowlab Billing
//!
//! The order/credit reconciliation engine: order creation against external
//! payment providers, idempotent confirmation via webhooks and client
//! polling, and exactly-once credit application to user balances.

pub mod credits;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod plans;
pub mod providers;
pub mod reconcile;

pub use credits::{CreditService, RedeemConfig, RedeemGrant};
pub use engine::BillingEngine;
pub use error::{BillingError, BillingResult};
pub use ledger::{CompletionOutcome, Ledger, MemoryLedger, PgLedger};
pub use orders::{CreatedOrder, OrderCoordinator};
pub use plans::{plan_by_id, validate_plan, RechargePlan, PLANS};
pub use providers::{
    AdapterRegistry, AirwallexAdapter, AirwallexConfig, CreemAdapter, CreemConfig, CreemProducts,
    IntentRequest, PaymentEvent, PaymentEventKind, ProviderAdapter, ProviderIntent, StatusProbe,
    StripeAdapter, StripeConfig, WebhookSignature,
};
pub use reconcile::{Outcome, Reconciler};
