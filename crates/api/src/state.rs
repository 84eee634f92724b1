//! Shared application state

use std::sync::Arc;

use glowlab_billing::BillingEngine;

use crate::config::Config;

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: BillingEngine,
}

impl AppState {
    pub fn new(config: Config, engine: BillingEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}
