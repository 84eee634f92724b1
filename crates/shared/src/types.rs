//! Common types used across Glowlab

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Payment provider backing an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Stripe,
    Creem,
    Airwallex,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Creem => "creem",
            PaymentMethod::Airwallex => "airwallex",
        }
    }

    /// Trade numbers carry a provider prefix so support can eyeball an order's origin
    pub fn trade_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "GL",
            PaymentMethod::Creem => "CR",
            PaymentMethod::Airwallex => "AW",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stripe" => Some(Self::Stripe),
            "creem" => Some(Self::Creem),
            "airwallex" => Some(Self::Airwallex),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order lifecycle status
///
/// Transitions are monotonic: `pending -> {paid|completed|failed}`,
/// `paid -> completed`. `completed` and `failed` are terminal. The edge into
/// `completed` is the only point at which credits are granted, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, awaiting provider confirmation
    Pending,
    /// Provider confirmed payment but credits not yet applied
    Paid,
    /// Credits applied; terminal
    Completed,
    /// Provider reported cancellation or error; terminal
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One purchase attempt, identified by a globally unique trade number.
///
/// Orders are never deleted; they are the audit trail for every credit grant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// Provider-prefixed trade number, generated at creation. Immutable.
    pub trade_no: String,
    /// Owning user; may be unknown until confirmation for anonymous purchases
    pub user_id: Option<Uuid>,
    /// Purchase amount in cents, fixed at creation
    pub amount_cents: i64,
    /// Credits granted on completion, fixed at creation
    pub credits: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    /// Provider-side object id (checkout session / payment intent), recorded
    /// after intent creation so manual confirmation can poll it
    pub provider_ref: Option<String>,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
}

/// A user's consumable credit balance. `credits` is never negative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub credits: i64,
}
