//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Bounds applied by the engine regardless of caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Maximum ids kept in a list parameter and per instantiation batch (default: 1000).
    pub max_array: usize,

    /// Page size when the caller gives none (default: 20).
    pub default_per_page: usize,

    /// Upper bound on any requested page size (default: 100).
    pub max_per_page: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_array: 1000,
            default_per_page: 20,
            max_per_page: 100,
        }
    }
}

impl EngineLimits {
    /// Clamp a requested page size into `1..=max_per_page`.
    pub fn per_page(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_per_page)
            .clamp(1, self.max_per_page.max(1))
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,

    /// Per-statement timeout applied to every query round trip (default: 10000).
    pub statement_timeout_ms: u64,

    /// Persisted queries unused for longer than this are removed by cleanup (default: 30).
    pub record_max_age_days: i64,

    pub limits: EngineLimits,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let statement_timeout_ms = env::var("QUERY_STATEMENT_TIMEOUT_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .context("QUERY_STATEMENT_TIMEOUT_MS must be a valid u64")?;

        let record_max_age_days = env::var("QUERY_RECORD_MAX_AGE_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("QUERY_RECORD_MAX_AGE_DAYS must be a valid integer")?;

        let defaults = EngineLimits::default();

        let max_array = env::var("QUERY_MAX_ARRAY")
            .map(|v| v.parse().context("QUERY_MAX_ARRAY must be a valid usize"))
            .unwrap_or(Ok(defaults.max_array))?;

        let default_per_page = env::var("QUERY_DEFAULT_PER_PAGE")
            .map(|v| v.parse().context("QUERY_DEFAULT_PER_PAGE must be a valid usize"))
            .unwrap_or(Ok(defaults.default_per_page))?;

        let max_per_page = env::var("QUERY_MAX_PER_PAGE")
            .map(|v| v.parse().context("QUERY_MAX_PER_PAGE must be a valid usize"))
            .unwrap_or(Ok(defaults.max_per_page))?;

        Ok(Self {
            database_url,
            database_max_connections,
            statement_timeout_ms,
            record_max_age_days,
            limits: EngineLimits {
                max_array,
                default_per_page,
                max_per_page,
            },
        })
    }
}
