//! Configuration infrastructure
//!
//! Settings are organized into four sections: marketplace credentials,
//! sync tuning, database location, and logging. Loaded from a JSON file
//! (created with defaults on first run) with environment overrides for the
//! config path and database url.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Environment variable naming the config file path.
pub const CONFIG_PATH_ENV: &str = "MELI_MIRROR_CONFIG";
/// Environment variable overriding the database url.
pub const DATABASE_URL_ENV: &str = "MELI_MIRROR_DATABASE_URL";

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Marketplace application credentials and endpoints
    pub marketplace: MarketplaceConfig,

    /// Sync engine tuning
    pub sync: SyncConfig,

    /// Database location
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Marketplace application credentials and API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Base URL of the marketplace REST API
    pub api_base: String,

    /// OAuth application client id
    pub client_id: String,

    /// OAuth application client secret
    pub client_secret: String,

    /// OAuth redirect URI registered with the marketplace
    pub redirect_uri: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Fixed delay between marketplace calls in milliseconds (crude rate limiting)
    pub request_delay_ms: u64,

    /// Maximum in-call retries for transport-level failures
    pub max_transport_retries: u32,

    /// Base delay for exponential retry backoff in milliseconds
    pub retry_base_delay_ms: u64,
}

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Page size for catalog scan discovery calls
    pub scan_page_limit: u32,

    /// Item ids per batch-detail call
    pub detail_batch_size: u32,

    /// Wall-clock budget for one tick in seconds
    pub tick_budget_seconds: u64,

    /// Maximum discovery iterations per tick (starvation guard)
    pub max_pages_per_tick: u32,

    /// Maximum detail batches per tick (starvation guard)
    pub max_detail_batches_per_tick: u32,

    /// Refresh the access token when it expires within this buffer
    pub token_refresh_buffer_seconds: i64,

    /// Length of the visit-count window in days
    pub visits_window_days: i64,

    /// Re-request a sync for at-rest accounts after this long
    pub auto_resync_after_seconds: i64,

    /// Added to the tick budget to produce the advisory lock TTL
    pub lock_ttl_margin_seconds: u64,
}

/// Database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite url, e.g. `sqlite:data/meli-mirror.db`
    pub url: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            marketplace: MarketplaceConfig::default(),
            sync: SyncConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            request_delay_ms: defaults::REQUEST_DELAY_MS,
            max_transport_retries: defaults::MAX_TRANSPORT_RETRIES,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scan_page_limit: defaults::SCAN_PAGE_LIMIT,
            detail_batch_size: defaults::DETAIL_BATCH_SIZE,
            tick_budget_seconds: defaults::TICK_BUDGET_SECONDS,
            max_pages_per_tick: defaults::MAX_PAGES_PER_TICK,
            max_detail_batches_per_tick: defaults::MAX_DETAIL_BATCHES_PER_TICK,
            token_refresh_buffer_seconds: defaults::TOKEN_REFRESH_BUFFER_SECONDS,
            visits_window_days: defaults::VISITS_WINDOW_DAYS,
            auto_resync_after_seconds: defaults::AUTO_RESYNC_AFTER_SECONDS,
            lock_ttl_margin_seconds: defaults::LOCK_TTL_MARGIN_SECONDS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: defaults::DATABASE_URL.to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Load configuration, creating the file with defaults on first run.
    ///
    /// Path resolution: `MELI_MIRROR_CONFIG` env var, else
    /// `meli-mirror.json` in the working directory. The database url can be
    /// overridden independently via `MELI_MIRROR_DATABASE_URL`.
    pub async fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("meli-mirror.json"));
        Self::load_from(&path).await
    }

    /// Load configuration from an explicit path.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            let config = AppConfig::default();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            let content = serde_json::to_string_pretty(&config)?;
            fs::write(path, content)
                .await
                .with_context(|| format!("Failed to write default config: {}", path.display()))?;
            info!("📝 Created default config at {}", path.display());
            config
        };

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database.url = url;
        }

        Ok(config)
    }

    /// Persist the current configuration back to `path`.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to save config: {}", path.display()))?;
        Ok(())
    }
}

/// Default values for all configuration settings
pub mod defaults {
    /// Default marketplace API base URL
    pub const API_BASE: &str = "https://api.mercadolibre.com";

    /// Default page size for scan-type discovery
    pub const SCAN_PAGE_LIMIT: u32 = 50;

    /// Default item ids per batch-detail call (marketplace multiget maximum)
    pub const DETAIL_BATCH_SIZE: u32 = 20;

    /// Default wall-clock budget for one tick in seconds
    pub const TICK_BUDGET_SECONDS: u64 = 25;

    /// Default maximum discovery iterations in one tick
    pub const MAX_PAGES_PER_TICK: u32 = 40;

    /// Default maximum detail batches in one tick
    pub const MAX_DETAIL_BATCHES_PER_TICK: u32 = 10;

    /// Default delay between marketplace calls in milliseconds
    pub const REQUEST_DELAY_MS: u64 = 120;

    /// Default token refresh safety buffer in seconds
    pub const TOKEN_REFRESH_BUFFER_SECONDS: i64 = 600;

    /// Default visit-count window in days
    pub const VISITS_WINDOW_DAYS: i64 = 30;

    /// Default delay before an at-rest account is re-synced (6 hours)
    pub const AUTO_RESYNC_AFTER_SECONDS: i64 = 21_600;

    /// Default margin added to the tick budget for the advisory lock TTL
    pub const LOCK_TTL_MARGIN_SECONDS: u64 = 30;

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Default maximum in-call transport retries
    pub const MAX_TRANSPORT_RETRIES: u32 = 3;

    /// Default base delay for retry backoff in milliseconds
    pub const RETRY_BASE_DELAY_MS: u64 = 500;

    /// Default SQLite url
    pub const DATABASE_URL: &str = "sqlite:data/meli-mirror.db";

    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default scheduler interval between ticks in milliseconds
    pub const SCHEDULER_INTERVAL_MS: u64 = 5_000;
}
