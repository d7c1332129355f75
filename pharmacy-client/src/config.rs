//! Client configuration.
//!
//! The whole client is configured from one TOML document. Every table except
//! `base_url` is optional and falls back to defaults.
//!
//! # Examples
//!
//! ```
//! use pharmacy_client::config::ClientConfig;
//!
//! let config = ClientConfig::from_toml(
//!     r#"
//!     base_url = "https://api.pharmacy.example"
//!
//!     [session]
//!     min_refresh_lead_secs = 120
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.api_base(), "https://api.pharmacy.example/api");
//! assert_eq!(config.session.min_refresh_lead_secs, 120);
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use url::Url;

use crate::{
    endpoints::Endpoints,
    error::{ClientError, Result},
    reliability::RetryPolicy,
    transport::HttpConfig,
};

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Backend origin, e.g. `https://api.pharmacy.example`.
    pub base_url: String,

    /// Prefix prepended to every endpoint path.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Session lifetime and persistence settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Backoff for idempotent reads.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Endpoint path overrides.
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] if the document is malformed or
    /// fails [`validate`](Self::validate).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ClientError::ConfigError(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Validates all sections.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::ConfigError(format!("invalid base_url: {e}")))?;
        match url.scheme() {
            "https" => {}
            "http" if self.http.allow_insecure_http => {}
            scheme => {
                return Err(ClientError::ConfigError(format!(
                    "base_url must use https (got {scheme}); set http.allow_insecure_http for \
                     local development"
                )));
            }
        }

        if !self.api_prefix.is_empty()
            && (!self.api_prefix.starts_with('/') || self.api_prefix.contains(".."))
        {
            return Err(ClientError::ConfigError(format!(
                "api_prefix must be empty or start with '/': {}",
                self.api_prefix
            )));
        }

        self.http.validate()?;
        self.session.validate()?;
        self.retry.validate()?;
        self.endpoints.validate()
    }

    /// Returns the API root every endpoint path is appended to.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/')
        )
    }
}

/// Session timing and persistence settings (`[session]` table).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Grace period applied when judging a token expired.
    pub clock_skew_secs: u64,
    /// Fraction of the remaining lifetime after which to refresh.
    pub refresh_ratio: f64,
    /// Refresh at least this long before expiry when the lifetime allows it.
    pub min_refresh_lead_secs: u64,
    /// Delay before retrying a failed proactive refresh.
    pub retry_interval_secs: u64,
    /// Session file. `None` keeps the session in memory only.
    pub storage_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            clock_skew_secs: 5,
            refresh_ratio: 0.8,
            min_refresh_lead_secs: 60,
            retry_interval_secs: 30,
            storage_path: None,
        }
    }
}

impl SessionSettings {
    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] if `refresh_ratio` is outside
    /// `(0, 1]` or `retry_interval_secs` is zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_ratio > 0.0 && self.refresh_ratio <= 1.0) {
            return Err(ClientError::ConfigError(
                "session.refresh_ratio must be in (0, 1]".to_owned(),
            ));
        }
        if self.retry_interval_secs == 0 {
            return Err(ClientError::ConfigError(
                "session.retry_interval_secs must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Clock skew tolerance.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Minimum refresh lead before expiry.
    #[must_use]
    pub fn min_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.min_refresh_lead_secs)
    }

    /// Delay before retrying a failed proactive refresh.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Retry settings for idempotent reads (`[retry]` table).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay_ms: u64,
    /// Upper bound for any delay.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay_ms: 100, max_delay_ms: 5_000 }
    }
}

impl RetrySettings {
    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigError`] if `max_attempts` is 0 or above 10.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ClientError::ConfigError(
                "retry.max_attempts must be between 1 and 10".to_owned(),
            ));
        }
        Ok(())
    }

    /// Builds the runtime policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

fn default_api_prefix() -> String {
    "/api".to_owned()
}
