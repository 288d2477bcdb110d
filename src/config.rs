// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Quiet interval after the last edit before queued answers are flushed.
pub const ANSWER_DEBOUNCE_MS: u64 = 750;

/// Attempts per answer before it is parked in the terminal failed set.
pub const ANSWER_RETRY_LIMIT: u32 = 3;

/// Ceiling on how long an explicit submit waits for unconfirmed answers.
pub const FLUSH_ALL_TIMEOUT_MS: u64 = 10_000;

/// Poll cadence while `flush_all` drains the pending and in-flight sets.
pub const FLUSH_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
        }
    }
}
