//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use glowlab_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    // Resource errors
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Order already failed: {0}")]
    OrderFailed(String),
    #[error("Provider does not support synchronous verification")]
    VerificationUnsupported,

    // Credit errors
    #[error("Insufficient credits")]
    InsufficientCredits,
    #[error("Redemption limit reached for this month")]
    RedemptionLimit,

    // Auth
    #[error("Authentication required")]
    Unauthorized,

    // Upstream / internal errors
    #[error("Payment provider unavailable")]
    ProviderUnavailable(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal(String),
    #[error("Service unavailable")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::SignatureInvalid => (StatusCode::BAD_REQUEST, "SIGNATURE_INVALID", self.to_string()),

            // Resources
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::OrderFailed(msg) => (StatusCode::CONFLICT, "ORDER_FAILED", msg.clone()),
            ApiError::VerificationUnsupported => (StatusCode::CONFLICT, "VERIFICATION_UNSUPPORTED", "This payment method confirms via webhook only. Credits arrive automatically once the provider notifies us.".to_string()),

            // Credits
            ApiError::InsufficientCredits => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", self.to_string()),
            ApiError::RedemptionLimit => (StatusCode::TOO_MANY_REQUESTS, "REDEMPTION_LIMIT", self.to_string()),

            // Auth
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            // Upstream / internal
            ApiError::ProviderUnavailable(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_UNAVAILABLE", "Payment provider unavailable, please retry".to_string()),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string()),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidPlan(msg) => {
                ApiError::BadRequest(format!("Invalid plan: {}", msg))
            }
            BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
            BillingError::OrderNotFound(trade_no) => {
                ApiError::NotFound(format!("Order {}", trade_no))
            }
            BillingError::UserNotFound(user_id) => ApiError::NotFound(format!("User {}", user_id)),
            BillingError::AlreadyFailed(trade_no) => ApiError::OrderFailed(trade_no),
            BillingError::SignatureInvalid => ApiError::SignatureInvalid,
            BillingError::WebhookEventNotSupported(event) => {
                ApiError::BadRequest(format!("Unsupported webhook event: {}", event))
            }
            BillingError::VerificationUnsupported => ApiError::VerificationUnsupported,
            BillingError::ProviderUnavailable(msg) | BillingError::Provider(msg) => {
                tracing::error!(error = %msg, "Provider error");
                ApiError::ProviderUnavailable(msg)
            }
            BillingError::CreditApplyFailure(msg) => {
                tracing::error!(error = %msg, "Credit application failed");
                ApiError::Internal(msg)
            }
            BillingError::InsufficientCredits => ApiError::InsufficientCredits,
            BillingError::RedemptionLimit => ApiError::RedemptionLimit,
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Database(msg)
            }
            BillingError::Config(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
