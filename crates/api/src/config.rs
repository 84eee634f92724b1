//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    /// Base URL providers redirect the user back to after checkout
    pub public_url: String,

    // Database
    pub database_url: String,

    // Admin
    pub admin_token: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            admin_token: {
                let token =
                    env::var("ADMIN_TOKEN").map_err(|_| ConfigError::Missing("ADMIN_TOKEN"))?;
                // Balance adjustments are money-adjacent; a guessable token is
                // as bad as none
                if token.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "ADMIN_TOKEN must be at least 32 characters",
                    ));
                }
                token
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("{0}")]
    WeakSecret(&'static str),
}
