//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// Raw provider/network errors are folded into this taxonomy at the adapter
/// boundary; nothing provider-shaped crosses into the reconciler.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid recharge plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Order already failed: {0}")]
    AlreadyFailed(String),

    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    #[error("Webhook event type not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Provider does not support synchronous verification; wait for the webhook")]
    VerificationUnsupported,

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Credit application failed: {0}")]
    CreditApplyFailure(String),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("Redemption limit reached for this month")]
    RedemptionLimit,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Timeout => {
                BillingError::ProviderUnavailable("Stripe request timed out".to_string())
            }
            other => BillingError::Provider(format!("Stripe API error: {}", other)),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            BillingError::ProviderUnavailable(err.to_string())
        } else {
            BillingError::Provider(err.to_string())
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
