//! Order routes: creation, confirmation, status

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use glowlab_billing::{Outcome, RechargePlan, PLANS};
use glowlab_shared::PaymentMethod;

use crate::{error::ApiError, state::AppState};

/// List the purchasable recharge plans
pub async fn list_plans() -> Json<&'static [RechargePlan]> {
    Json(PLANS)
}

/// Request to create an order
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    /// Omitted for purchases started before login
    pub user_id: Option<Uuid>,
    /// Must match a catalog plan together with `credits`
    pub amount: i64,
    pub credits: i64,
    pub method: String,
}

/// Response from creating an order
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub trade_no: String,
    pub redirect_url: String,
}

/// Request to confirm an order after a checkout redirect
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmOrderRequest {
    pub trade_no: String,
    pub user_id: Option<Uuid>,
}

/// Confirmation result; identical for webhook and manual winners
#[derive(Debug, Serialize)]
pub struct ConfirmOrderResponse {
    pub success: bool,
    pub credits: i64,
    pub message: String,
}

/// Read-only order status
#[derive(Debug, Serialize)]
pub struct CheckOrderResponse {
    pub status: String,
    pub credits: i64,
}

/// Create a pending order and provider checkout
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    let method = PaymentMethod::from_str(&req.method)
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported payment method: {}", req.method)))?;

    let created = state
        .engine
        .orders
        .create_order(req.user_id, req.amount, req.credits, method)
        .await?;

    Ok(Json(CreateOrderResponse {
        trade_no: created.trade_no,
        redirect_url: created.redirect_url,
    }))
}

/// Manually confirm an order (fallback for when the webhook has not landed)
pub async fn confirm_order(
    State(state): State<AppState>,
    Json(req): Json<ConfirmOrderRequest>,
) -> Result<Json<ConfirmOrderResponse>, ApiError> {
    let outcome = state
        .engine
        .reconciler
        .confirm_order(&req.trade_no, req.user_id)
        .await?;

    let response = match outcome {
        Outcome::Credited { credits } => ConfirmOrderResponse {
            success: true,
            credits,
            message: "Recharge successful".to_string(),
        },
        Outcome::AlreadyCompleted { credits } => ConfirmOrderResponse {
            success: true,
            credits,
            message: "Order already processed".to_string(),
        },
        Outcome::NotYetPaid => ConfirmOrderResponse {
            success: false,
            credits: 0,
            message: "Waiting for payment confirmation. If you have paid, please retry in a moment."
                .to_string(),
        },
        Outcome::Failed => ConfirmOrderResponse {
            success: false,
            credits: 0,
            message: "Payment failed or was cancelled".to_string(),
        },
    };

    Ok(Json(response))
}

/// Check an order's status without side effects
pub async fn check_order(
    State(state): State<AppState>,
    Path(trade_no): Path<String>,
) -> Result<Json<CheckOrderResponse>, ApiError> {
    let response = match state.engine.reconciler.check_order(&trade_no).await? {
        Some((status, credits)) => CheckOrderResponse {
            status: status.to_string(),
            credits,
        },
        None => CheckOrderResponse {
            status: "unknown".to_string(),
            credits: 0,
        },
    };
    Ok(Json(response))
}
