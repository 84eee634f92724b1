//! Stale order expiry
//!
//! Orders the provider never confirmed stay `pending` forever on their own;
//! this sweep fails them after a cutoff so they stop looking like purchases
//! in flight. The transition is the same conditional update the reconciler
//! uses, so a confirmation racing the sweep still resolves to one winner.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, info};

use glowlab_billing::Ledger;

/// Fail `pending` orders older than `max_age_hours`
pub async fn expire_stale_orders(ledger: Arc<dyn Ledger>, max_age_hours: i64) {
    let cutoff = OffsetDateTime::now_utc() - time::Duration::hours(max_age_hours);

    match ledger.expire_stale_orders(cutoff).await {
        Ok(expired) => {
            if expired > 0 {
                info!(
                    expired = expired,
                    max_age_hours = max_age_hours,
                    "Expired stale pending orders"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to expire stale orders");
        }
    }
}
