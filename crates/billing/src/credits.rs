//! Credit applier and the balance operations sharing its atomic discipline
//!
//! Every balance mutation in the system goes through this service, and each
//! one is a single conditional update in the store. There is no
//! read-modify-write of a balance anywhere.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{CompletionOutcome, Ledger};

/// Redeem-code configuration
#[derive(Debug, Clone)]
pub struct RedeemConfig {
    /// Accepted codes; empty disables redemption
    pub codes: Vec<String>,
    /// Credits granted per redemption
    pub credits_per_code: i64,
}

impl RedeemConfig {
    /// Create config from environment variables.
    /// `REDEEM_CODES` is a comma-separated list; unset disables redemption.
    pub fn from_env() -> Self {
        Self {
            codes: std::env::var("REDEEM_CODES")
                .map(|raw| {
                    raw.split(',')
                        .map(|code| code.trim().to_uppercase())
                        .filter(|code| !code.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            credits_per_code: std::env::var("REDEEM_CODE_CREDITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    pub fn disabled() -> Self {
        Self {
            codes: Vec::new(),
            credits_per_code: 5,
        }
    }
}

/// Result of a successful redemption
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RedeemGrant {
    pub credits_granted: i64,
    pub balance: i64,
}

/// Performs the irreversible balance mutations
#[derive(Clone)]
pub struct CreditService {
    ledger: Arc<dyn Ledger>,
    redeem: RedeemConfig,
}

impl CreditService {
    pub fn new(ledger: Arc<dyn Ledger>, redeem: RedeemConfig) -> Self {
        Self { ledger, redeem }
    }

    /// Apply an order's credits under the completion guard: the store claims
    /// the `completed` transition and increments the balance as one unit, so
    /// this executes at most once per trade number no matter how many
    /// confirmation paths race into it.
    pub async fn apply_completion(
        &self,
        trade_no: &str,
        user_id: Uuid,
    ) -> BillingResult<CompletionOutcome> {
        let outcome = self.ledger.complete_and_credit(trade_no, user_id).await?;
        if let CompletionOutcome::Credited { credits } = outcome {
            tracing::info!(
                trade_no = %trade_no,
                user_id = %user_id,
                credits = credits,
                "Applied order credits"
            );
        }
        Ok(outcome)
    }

    pub async fn balance(&self, user_id: Uuid) -> BillingResult<i64> {
        self.ledger
            .balance(user_id)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))
    }

    /// Debit a feature consumption. Fails without mutation when the balance
    /// cannot cover the cost.
    pub async fn consume(&self, user_id: Uuid, cost: i64) -> BillingResult<i64> {
        if cost <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "consumption cost must be positive, got {}",
                cost
            )));
        }
        self.ledger
            .try_debit(user_id, cost)
            .await?
            .ok_or(BillingError::InsufficientCredits)
    }

    /// Admin balance adjustment by delta; the store clamps at zero.
    pub async fn adjust(&self, user_id: Uuid, delta: i64) -> BillingResult<i64> {
        let balance = self
            .ledger
            .adjust_credits(user_id, delta)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        tracing::info!(
            user_id = %user_id,
            delta = delta,
            balance = balance,
            "Adjusted user credits"
        );
        Ok(balance)
    }

    /// Redeem a promo code: one grant per user per calendar month.
    pub async fn redeem(&self, user_id: Uuid, code: &str) -> BillingResult<RedeemGrant> {
        let normalized = code.trim().to_uppercase();
        if normalized.is_empty() || !self.redeem.codes.contains(&normalized) {
            return Err(BillingError::InvalidInput("unknown redeem code".to_string()));
        }

        let balance = self
            .ledger
            .grant_redemption(user_id, &normalized, self.redeem.credits_per_code)
            .await?;

        tracing::info!(
            user_id = %user_id,
            credits = self.redeem.credits_per_code,
            "Redeemed promo code"
        );

        Ok(RedeemGrant {
            credits_granted: self.redeem.credits_per_code,
            balance,
        })
    }
}
