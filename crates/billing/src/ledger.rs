//! Ledger store: durable orders and user balances
//!
//! All order mutations go through the conditional-transition methods here and
//! all balance mutations are single atomic updates, so two confirmation
//! triggers racing on one trade number collapse to a single winner and two
//! orders completing for the same user never drop an increment.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use glowlab_shared::{Order, OrderStatus, PaymentMethod};

use crate::error::{BillingError, BillingResult};

/// Result of attempting to claim the credit-applying transition for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This caller won the transition; credits were applied
    Credited { credits: i64 },
    /// Another caller already completed the order; no mutation performed
    AlreadyCompleted { credits: i64 },
    /// The order is terminally failed; no mutation performed
    AlreadyFailed,
    /// Unknown trade number
    NotFound,
}

/// Repository interface over the durable store.
///
/// Injected into the engine services so tests can substitute [`MemoryLedger`].
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn insert_order(&self, order: &Order) -> BillingResult<()>;

    async fn order_by_trade_no(&self, trade_no: &str) -> BillingResult<Option<Order>>;

    /// Record the provider-side object id after intent creation
    async fn set_provider_ref(&self, trade_no: &str, provider_ref: &str) -> BillingResult<()>;

    /// Atomically claim `{pending,paid} -> completed` for `trade_no` and add
    /// the order's credits to `user_id`'s balance. The claim and the increment
    /// commit together; if the increment cannot be applied the claim is rolled
    /// back and the order stays retryable.
    async fn complete_and_credit(
        &self,
        trade_no: &str,
        user_id: Uuid,
    ) -> BillingResult<CompletionOutcome>;

    /// Conditional `pending -> paid`. No-op if the order already advanced.
    async fn mark_paid(&self, trade_no: &str) -> BillingResult<()>;

    /// Conditional `{pending,paid} -> failed`. Returns whether a row moved.
    async fn mark_failed(&self, trade_no: &str) -> BillingResult<bool>;

    async fn balance(&self, user_id: Uuid) -> BillingResult<Option<i64>>;

    /// Atomic balance adjustment (admin). Negative deltas clamp at zero.
    /// Returns the new balance.
    async fn adjust_credits(&self, user_id: Uuid, delta: i64) -> BillingResult<Option<i64>>;

    /// Atomic conditional debit. Returns the new balance, or `None` when the
    /// user is unknown or has insufficient credits.
    async fn try_debit(&self, user_id: Uuid, cost: i64) -> BillingResult<Option<i64>>;

    /// Record a redeem-code grant and apply it in one step. At most one
    /// redemption per user per calendar month; a second attempt fails with
    /// [`BillingError::RedemptionLimit`] and applies nothing.
    async fn grant_redemption(
        &self,
        user_id: Uuid,
        code: &str,
        credits: i64,
    ) -> BillingResult<i64>;

    /// Sweep `pending` orders created before `cutoff` to `failed`.
    /// Returns how many rows moved.
    async fn expire_stale_orders(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

/// Postgres-backed ledger
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert_order(&self, order: &Order) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (trade_no, user_id, amount_cents, credits, status, payment_method, provider_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&order.trade_no)
        .bind(order.user_id)
        .bind(order.amount_cents)
        .bind(order.credits)
        .bind(order.status)
        .bind(order.payment_method)
        .bind(&order.provider_ref)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order_by_trade_no(&self, trade_no: &str) -> BillingResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT trade_no, user_id, amount_cents, credits, status, payment_method, provider_ref, created_at, paid_at
            FROM orders
            WHERE trade_no = $1
            "#,
        )
        .bind(trade_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn set_provider_ref(&self, trade_no: &str, provider_ref: &str) -> BillingResult<()> {
        sqlx::query("UPDATE orders SET provider_ref = $2 WHERE trade_no = $1")
            .bind(trade_no)
            .bind(provider_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_and_credit(
        &self,
        trade_no: &str,
        user_id: Uuid,
    ) -> BillingResult<CompletionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Winner selection: the conditional UPDATE serializes racing triggers
        // on one trade number. Losers match zero rows and observe the
        // post-state below.
        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = 'completed', user_id = $2, paid_at = NOW()
            WHERE trade_no = $1 AND status IN ('pending', 'paid')
            RETURNING credits
            "#,
        )
        .bind(trade_no)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((credits,)) = claimed else {
            tx.rollback().await?;
            let current: Option<(OrderStatus, i64)> =
                sqlx::query_as("SELECT status, credits FROM orders WHERE trade_no = $1")
                    .bind(trade_no)
                    .fetch_optional(&self.pool)
                    .await?;
            return Ok(match current {
                Some((OrderStatus::Completed, credits)) => {
                    CompletionOutcome::AlreadyCompleted { credits }
                }
                Some((OrderStatus::Failed, _)) => CompletionOutcome::AlreadyFailed,
                // The claim can only miss for terminal rows, but re-checking
                // keeps the store honest if that ever changes.
                Some(_) => CompletionOutcome::AlreadyFailed,
                None => CompletionOutcome::NotFound,
            });
        };

        // Balance rows are created at registration; a zero-row update means
        // the target user does not exist and the claim must not stand.
        let updated = sqlx::query("UPDATE users SET credits = credits + $2 WHERE id = $1")
            .bind(user_id)
            .bind(credits)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BillingError::CreditApplyFailure(format!(
                "no balance row for user {}",
                user_id
            )));
        }

        tx.commit().await?;
        Ok(CompletionOutcome::Credited { credits })
    }

    async fn mark_paid(&self, trade_no: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', paid_at = NOW()
            WHERE trade_no = $1 AND status = 'pending'
            "#,
        )
        .bind(trade_no)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, trade_no: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'failed'
            WHERE trade_no = $1 AND status IN ('pending', 'paid')
            "#,
        )
        .bind(trade_no)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn balance(&self, user_id: Uuid) -> BillingResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(credits,)| credits))
    }

    async fn adjust_credits(&self, user_id: Uuid, delta: i64) -> BillingResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET credits = GREATEST(0, credits + $2)
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(credits,)| credits))
    }

    async fn try_debit(&self, user_id: Uuid, cost: i64) -> BillingResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET credits = credits - $2
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(credits,)| credits))
    }

    async fn grant_redemption(
        &self,
        user_id: Uuid,
        code: &str,
        credits: i64,
    ) -> BillingResult<i64> {
        let mut tx = self.pool.begin().await?;

        // The (user_id, month_key) unique constraint enforces the
        // one-per-month rule even under concurrent redemptions.
        let inserted = sqlx::query(
            r#"
            INSERT INTO redemptions (id, user_id, code, credits_granted, redeemed_at, month_key)
            VALUES ($1, $2, $3, $4, NOW(), to_char(NOW(), 'YYYY-MM'))
            ON CONFLICT (user_id, month_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(code)
        .bind(credits)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BillingError::RedemptionLimit);
        }

        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE users SET credits = credits + $2 WHERE id = $1 RETURNING credits",
        )
        .bind(user_id)
        .bind(credits)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((balance,)) = row else {
            tx.rollback().await?;
            return Err(BillingError::UserNotFound(user_id.to_string()));
        };

        tx.commit().await?;
        Ok(balance)
    }

    async fn expire_stale_orders(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'failed'
            WHERE status = 'pending' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// In-memory implementation (tests, local development)
// =============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    orders: HashMap<String, Order>,
    balances: HashMap<Uuid, i64>,
    /// user -> (year, month) of their last redemption
    redemptions: HashMap<Uuid, (i32, u8)>,
}

/// In-memory ledger with the same conditional-write semantics as [`PgLedger`].
///
/// The single mutex makes every method a serialized read-check-mutate step,
/// which is exactly the behavior the conditional UPDATEs give Postgres.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user balance row (registration is outside the engine's scope)
    pub fn with_user(self, user_id: Uuid, credits: i64) -> Self {
        {
            let mut state = self.lock();
            state.balances.insert(user_id, credits);
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Mutex poisoning only happens if a holder panicked; propagating the
        // inner state is still sound for a test fake.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_order(&self, order: &Order) -> BillingResult<()> {
        let mut state = self.lock();
        if state.orders.contains_key(&order.trade_no) {
            return Err(BillingError::Database(format!(
                "duplicate trade_no {}",
                order.trade_no
            )));
        }
        state.orders.insert(order.trade_no.clone(), order.clone());
        Ok(())
    }

    async fn order_by_trade_no(&self, trade_no: &str) -> BillingResult<Option<Order>> {
        Ok(self.lock().orders.get(trade_no).cloned())
    }

    async fn set_provider_ref(&self, trade_no: &str, provider_ref: &str) -> BillingResult<()> {
        if let Some(order) = self.lock().orders.get_mut(trade_no) {
            order.provider_ref = Some(provider_ref.to_string());
        }
        Ok(())
    }

    async fn complete_and_credit(
        &self,
        trade_no: &str,
        user_id: Uuid,
    ) -> BillingResult<CompletionOutcome> {
        let mut state = self.lock();

        let Some(order) = state.orders.get(trade_no).cloned() else {
            return Ok(CompletionOutcome::NotFound);
        };

        match order.status {
            OrderStatus::Completed => {
                return Ok(CompletionOutcome::AlreadyCompleted {
                    credits: order.credits,
                })
            }
            OrderStatus::Failed => return Ok(CompletionOutcome::AlreadyFailed),
            OrderStatus::Pending | OrderStatus::Paid => {}
        }

        // Increment first: the claim must not stand if the user is unknown
        let Some(balance) = state.balances.get_mut(&user_id) else {
            return Err(BillingError::CreditApplyFailure(format!(
                "no balance row for user {}",
                user_id
            )));
        };
        *balance += order.credits;

        let credits = order.credits;
        if let Some(stored) = state.orders.get_mut(trade_no) {
            stored.status = OrderStatus::Completed;
            stored.user_id = Some(user_id);
            stored.paid_at = Some(OffsetDateTime::now_utc());
        }

        Ok(CompletionOutcome::Credited { credits })
    }

    async fn mark_paid(&self, trade_no: &str) -> BillingResult<()> {
        let mut state = self.lock();
        if let Some(order) = state.orders.get_mut(trade_no) {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Paid;
                order.paid_at = Some(OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, trade_no: &str) -> BillingResult<bool> {
        let mut state = self.lock();
        if let Some(order) = state.orders.get_mut(trade_no) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Failed;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn balance(&self, user_id: Uuid) -> BillingResult<Option<i64>> {
        Ok(self.lock().balances.get(&user_id).copied())
    }

    async fn adjust_credits(&self, user_id: Uuid, delta: i64) -> BillingResult<Option<i64>> {
        let mut state = self.lock();
        Ok(state.balances.get_mut(&user_id).map(|balance| {
            *balance = (*balance + delta).max(0);
            *balance
        }))
    }

    async fn try_debit(&self, user_id: Uuid, cost: i64) -> BillingResult<Option<i64>> {
        let mut state = self.lock();
        match state.balances.get_mut(&user_id) {
            Some(balance) if *balance >= cost => {
                *balance -= cost;
                Ok(Some(*balance))
            }
            _ => Ok(None),
        }
    }

    async fn grant_redemption(
        &self,
        user_id: Uuid,
        _code: &str,
        credits: i64,
    ) -> BillingResult<i64> {
        let mut state = self.lock();

        let now = OffsetDateTime::now_utc();
        let month = (now.year(), now.month() as u8);
        if state.redemptions.get(&user_id) == Some(&month) {
            return Err(BillingError::RedemptionLimit);
        }

        let Some(balance) = state.balances.get_mut(&user_id) else {
            return Err(BillingError::UserNotFound(user_id.to_string()));
        };
        *balance += credits;
        let balance = *balance;
        state.redemptions.insert(user_id, month);
        Ok(balance)
    }

    async fn expire_stale_orders(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let mut state = self.lock();
        let mut moved = 0;
        for order in state.orders.values_mut() {
            if order.status == OrderStatus::Pending && order.created_at < cutoff {
                order.status = OrderStatus::Failed;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

/// Build a pending order row for insertion by the coordinator
pub fn new_pending_order(
    trade_no: String,
    user_id: Option<Uuid>,
    amount_cents: i64,
    credits: i64,
    payment_method: PaymentMethod,
) -> Order {
    Order {
        trade_no,
        user_id,
        amount_cents,
        credits,
        status: OrderStatus::Pending,
        payment_method,
        provider_ref: None,
        created_at: OffsetDateTime::now_utc(),
        paid_at: None,
    }
}
