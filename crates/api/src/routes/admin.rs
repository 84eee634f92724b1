//! Admin routes

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// Request to adjust a user's balance by a delta
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjustCreditsRequest {
    pub user_id: Uuid,
    pub delta: i64,
}

/// Result of a balance adjustment
#[derive(Debug, Serialize)]
pub struct AdjustCreditsResponse {
    pub user_id: Uuid,
    pub credits: i64,
}

/// Verify the admin bearer token in constant time
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let expected = state.config.admin_token.as_bytes();
    if provided.as_bytes().ct_eq(expected).unwrap_u8() != 1 {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

/// Adjust a user's credits (admin console)
pub async fn adjust_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdjustCreditsRequest>,
) -> Result<Json<AdjustCreditsResponse>, ApiError> {
    require_admin(&state, &headers)?;

    let credits = state.engine.credits.adjust(req.user_id, req.delta).await?;

    tracing::info!(
        user_id = %req.user_id,
        delta = req.delta,
        credits = credits,
        "Admin adjusted user credits"
    );

    Ok(Json(AdjustCreditsResponse {
        user_id: req.user_id,
        credits,
    }))
}
