//! Glowlab API server

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use glowlab_api::{routes, AppState, Config};
use glowlab_billing::{
    AdapterRegistry, AirwallexAdapter, BillingEngine, CreemAdapter, PgLedger, RedeemConfig,
    StripeAdapter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = glowlab_shared::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    glowlab_shared::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let ledger = Arc::new(PgLedger::new(pool));

    // Providers are enabled by the presence of their secrets; a missing
    // provider disables its method rather than blocking startup.
    let mut adapters = AdapterRegistry::new();
    match StripeAdapter::from_env() {
        Ok(adapter) => {
            adapters = adapters.register(Arc::new(adapter));
            tracing::info!("Stripe adapter enabled");
        }
        Err(e) => tracing::warn!(error = %e, "Stripe adapter disabled"),
    }
    match CreemAdapter::from_env() {
        Ok(adapter) => {
            adapters = adapters.register(Arc::new(adapter));
            tracing::info!("Creem adapter enabled");
        }
        Err(e) => tracing::warn!(error = %e, "Creem adapter disabled"),
    }
    match AirwallexAdapter::from_env() {
        Ok(adapter) => {
            adapters = adapters.register(Arc::new(adapter));
            tracing::info!("Airwallex adapter enabled");
        }
        Err(e) => tracing::warn!(error = %e, "Airwallex adapter disabled"),
    }

    let engine = BillingEngine::new(
        ledger,
        adapters,
        config.public_url.clone(),
        RedeemConfig::from_env(),
    );

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, engine);
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Glowlab API listening");

    axum::serve(listener, router)
        .await
        .context("Server error")?;

    Ok(())
}
