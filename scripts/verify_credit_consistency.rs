#!/usr/bin/env rust-script
//! Credit Consistency Verification Script
//!
//! Detects order/credit drift for the Glowlab reconciliation engine.
//!
//! ## Usage
//! ```bash
//! cargo run --bin verify_credit_consistency
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Checks Performed
//! 1. Orders stuck in `paid` (payment confirmed but credits never applied)
//! 2. `completed` orders with no owning user (credits went nowhere)
//! 3. `completed` orders missing paid_at
//! 4. Stale `pending` orders the expiry worker should have swept

use std::env;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Glowlab Credit Consistency Verification");
    println!("========================================\n");

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    // Initialize database connection
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    // ========================================================================
    // Check 1: Orders stuck in 'paid'
    // ========================================================================
    println!("Check 1: Orders with confirmed payment but unapplied credits...");

    let stuck_paid: Vec<(String, Option<uuid::Uuid>, i64)> = sqlx::query_as(
        r#"
        SELECT trade_no, user_id, credits
        FROM orders
        WHERE status = 'paid'
          AND paid_at < NOW() - INTERVAL '1 hour'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if stuck_paid.is_empty() {
        println!("  ✓ No orders stuck in 'paid'");
    } else {
        println!("  ⚠ Found {} orders paid but not completed", stuck_paid.len());
        for (trade_no, user_id, credits) in &stuck_paid {
            println!("    - {}: {} credits (user: {:?})", trade_no, credits, user_id);
        }
    }

    // ========================================================================
    // Check 2: Completed orders without an owner
    // ========================================================================
    println!("\nCheck 2: Completed orders without an owning user...");

    let orphaned: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT trade_no, credits
        FROM orders
        WHERE status = 'completed' AND user_id IS NULL
        "#
    )
    .fetch_all(&pool)
    .await?;

    if orphaned.is_empty() {
        println!("  ✓ Every completed order has an owner");
    } else {
        println!("  ⚠ Found {} completed orders with no user", orphaned.len());
        for (trade_no, credits) in &orphaned {
            println!("    - {}: {} credits", trade_no, credits);
        }
    }

    // ========================================================================
    // Check 3: Completed orders missing paid_at
    // ========================================================================
    println!("\nCheck 3: Completed orders missing paid_at...");

    let missing_paid_at: Vec<(String,)> = sqlx::query_as(
        "SELECT trade_no FROM orders WHERE status = 'completed' AND paid_at IS NULL"
    )
    .fetch_all(&pool)
    .await?;

    if missing_paid_at.is_empty() {
        println!("  ✓ All completed orders carry paid_at");
    } else {
        println!("  ⚠ Found {} completed orders without paid_at", missing_paid_at.len());
        for (trade_no,) in &missing_paid_at {
            println!("    - {}", trade_no);
        }
    }

    // ========================================================================
    // Check 4: Stale pending orders
    // ========================================================================
    println!("\nCheck 4: Stale pending orders...");

    let stale_pending: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT trade_no, payment_method
        FROM orders
        WHERE status = 'pending'
          AND created_at < NOW() - INTERVAL '48 hours'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if stale_pending.is_empty() {
        println!("  ✓ No stale pending orders");
    } else {
        println!("  ⚠ Found {} pending orders older than 48h (is the worker running?)", stale_pending.len());
        for (trade_no, method) in &stale_pending {
            println!("    - {} ({})", trade_no, method);
        }
    }

    // ========================================================================
    // Summary Report
    // ========================================================================
    println!("\n========================================");
    println!("Summary");
    println!("========================================");

    let total_issues = stuck_paid.len()
        + orphaned.len()
        + missing_paid_at.len()
        + stale_pending.len();

    if total_issues == 0 {
        println!("✓ No credit inconsistencies detected!");
    } else {
        println!("⚠ Found {} total issues", total_issues);
        println!("\nRecommendations:");
        println!("1. Stuck 'paid' orders: replay the provider webhook or confirm manually");
        println!("2. Verify webhook signature secrets are current for every provider");
        println!("3. Check the expiry worker is scheduled and reaching the database");
    }

    Ok(())
}
