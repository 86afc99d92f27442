//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CARTSYNC_API_URL` - Base URL of the cart API (default: `http://localhost:5000/api`)
//! - `CARTSYNC_CATALOG_URL` - Product catalog listing (default: `{api}/admin/products`)
//! - `CARTSYNC_STATE_DIR` - Directory for the persisted guest cart and token (default: `.cartsync`)
//! - `CARTSYNC_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 10)
//! - `CARTSYNC_CATALOG_TTL_SECS` - Catalog cache TTL (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_STATE_DIR: &str = ".cartsync";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CATALOG_TTL_SECS: u64 = 300;

/// File name of the persisted guest cart inside the state directory.
pub const GUEST_CART_FILE: &str = "guest_cart.json";
/// File name of the persisted access token inside the state directory.
pub const TOKEN_FILE: &str = "token";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the cart API
    pub api_url: Url,
    /// Product catalog listing URL
    pub catalog_url: Url,
    /// Directory holding the guest cart document and the access token
    pub state_dir: PathBuf,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    /// How long a fetched catalog stays cached
    pub catalog_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = parse_url(
            "CARTSYNC_API_URL",
            &lookup("CARTSYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        )?;
        let catalog_url = match lookup("CARTSYNC_CATALOG_URL") {
            Some(raw) => parse_url("CARTSYNC_CATALOG_URL", &raw)?,
            None => default_catalog_url(&api_url)?,
        };
        let state_dir = lookup("CARTSYNC_STATE_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from);
        let request_timeout = Duration::from_secs(parse_secs(
            "CARTSYNC_REQUEST_TIMEOUT_SECS",
            lookup("CARTSYNC_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let catalog_ttl = Duration::from_secs(parse_secs(
            "CARTSYNC_CATALOG_TTL_SECS",
            lookup("CARTSYNC_CATALOG_TTL_SECS"),
            DEFAULT_CATALOG_TTL_SECS,
        )?);
        let sentry_dsn = lookup("SENTRY_DSN").filter(|dsn| !dsn.is_empty());

        Ok(Self {
            api_url,
            catalog_url,
            state_dir,
            request_timeout,
            catalog_ttl,
            sentry_dsn,
        })
    }

    /// Configuration pointing at `api_url` with every other setting defaulted.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `api_url` is not a valid http(s) URL.
    pub fn for_api(api_url: &str, state_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let api_url = parse_url("api_url", api_url)?;
        let catalog_url = default_catalog_url(&api_url)?;
        Ok(Self {
            api_url,
            catalog_url,
            state_dir: state_dir.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            catalog_ttl: Duration::from_secs(DEFAULT_CATALOG_TTL_SECS),
            sentry_dsn: None,
        })
    }

    /// Path of the persisted guest cart document.
    #[must_use]
    pub fn guest_cart_path(&self) -> PathBuf {
        self.state_dir.join(GUEST_CART_FILE)
    }

    /// Path of the persisted access token.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        self.state_dir.join(TOKEN_FILE)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse and validate an http(s) URL.
fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

fn default_catalog_url(api_url: &Url) -> Result<Url, ConfigError> {
    let base = api_url.as_str().trim_end_matches('/');
    parse_url("CARTSYNC_CATALOG_URL", &format!("{base}/admin/products"))
}

/// Parse a seconds value, falling back to `default` when unset.
fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    raw.map_or(Ok(default), |value| {
        value
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}
