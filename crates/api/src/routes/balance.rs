//! Balance routes: reads, feature consumption, redeem codes
//!
//! This is the only contract through which the UI reads or spends balances;
//! every mutation goes through the credit service's atomic operations.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// A user's current balance
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub credits: i64,
}

/// Request to debit a feature consumption
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumeRequest {
    pub user_id: Uuid,
    pub cost: i64,
}

/// Request to redeem a promo code
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedeemRequest {
    pub user_id: Uuid,
    pub code: String,
}

/// Response for a successful redemption
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub credits_granted: i64,
    pub credits: i64,
}

/// Get a user's credit balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let credits = state.engine.credits.balance(user_id).await?;
    Ok(Json(BalanceResponse { user_id, credits }))
}

/// Debit credits for a feature use
pub async fn consume(
    State(state): State<AppState>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let credits = state.engine.credits.consume(req.user_id, req.cost).await?;
    Ok(Json(BalanceResponse {
        user_id: req.user_id,
        credits,
    }))
}

/// Redeem a promo code (one per user per calendar month)
pub async fn redeem(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let grant = state.engine.credits.redeem(req.user_id, &req.code).await?;
    Ok(Json(RedeemResponse {
        credits_granted: grant.credits_granted,
        credits: grant.balance,
    }))
}
