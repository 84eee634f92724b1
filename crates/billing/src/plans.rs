//! Recharge plan catalog
//!
//! Amounts are in cents; providers require integer minor units. An order may
//! only be created for a `(amount, credits)` pair that exists here, so a
//! tampered client cannot buy 30 credits at the test-plan price.

use serde::Serialize;

use crate::error::{BillingError, BillingResult};

/// A purchasable credit pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RechargePlan {
    pub id: &'static str,
    pub amount_cents: i64,
    pub credits: i64,
    pub name: &'static str,
}

/// All purchasable plans
pub const PLANS: &[RechargePlan] = &[
    RechargePlan {
        id: "plan_test",
        amount_cents: 100,
        credits: 1,
        name: "Glowlab - Test (1 Credit)",
    },
    RechargePlan {
        id: "plan_12",
        amount_cents: 199,
        credits: 12,
        name: "Glowlab - 12 Credits",
    },
    RechargePlan {
        id: "plan_30",
        amount_cents: 399,
        credits: 30,
        name: "Glowlab - 30 Credits",
    },
];

/// Look up a plan by its identifier
pub fn plan_by_id(id: &str) -> Option<&'static RechargePlan> {
    PLANS.iter().find(|p| p.id == id)
}

/// Look up a plan by its `(amount, credits)` pair, rejecting unknown combinations
pub fn validate_plan(amount_cents: i64, credits: i64) -> BillingResult<&'static RechargePlan> {
    if amount_cents <= 0 || credits <= 0 {
        return Err(BillingError::InvalidPlan(format!(
            "amount and credits must be positive, got {}c / {} credits",
            amount_cents, credits
        )));
    }
    PLANS
        .iter()
        .find(|p| p.amount_cents == amount_cents && p.credits == credits)
        .ok_or_else(|| {
            BillingError::InvalidPlan(format!(
                "no plan matches {}c / {} credits",
                amount_cents, credits
            ))
        })
}
