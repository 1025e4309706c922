//! Client configuration

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::{PaygError, Result};

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default length of a page-level access window in seconds
pub const DEFAULT_AD_FREE_SECONDS: u64 = 300;

/// Configuration shared by the client, gateway and window manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the resource and payment backend
    pub base_url: String,
    /// Request timeout in seconds; zero disables the timeout
    pub timeout_secs: u64,
    /// Access window used when the backend does not state one
    pub ad_free_seconds: u64,
    /// File holding page-level grants across restarts
    pub grant_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            ad_free_seconds: DEFAULT_AD_FREE_SECONDS,
            grant_file: None,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `base_url` with default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PaygError::config(format!("Failed to read config file: {}", e)))?;

        let config: ClientConfig = serde_json::from_str(&content)
            .map_err(|e| PaygError::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("PAYG_BASE_URL") {
            config.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("PAYG_TIMEOUT_SECS") {
            config.timeout_secs = timeout
                .parse()
                .map_err(|e| PaygError::config(format!("Invalid PAYG_TIMEOUT_SECS: {}", e)))?;
        }

        if let Ok(seconds) = std::env::var("PAYG_AD_FREE_SECONDS") {
            config.ad_free_seconds = seconds
                .parse()
                .map_err(|e| PaygError::config(format!("Invalid PAYG_AD_FREE_SECONDS: {}", e)))?;
        }

        if let Ok(path) = std::env::var("PAYG_GRANT_FILE") {
            config.grant_file = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(PaygError::config("Base URL cannot be empty"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(PaygError::config(
                "Base URL must start with http:// or https://",
            ));
        }

        if self.ad_free_seconds == 0 {
            return Err(PaygError::config("Ad-free window must be at least one second"));
        }

        Ok(())
    }

    /// Base URL with a trailing slash so relative paths join beneath it
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Request timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Build the HTTP client described by this configuration
    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.timeout() {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| PaygError::config(format!("Failed to create HTTP client: {}", e)))
    }

    /// Set the timeout in seconds
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the default access window
    pub fn with_ad_free_seconds(mut self, seconds: u64) -> Self {
        self.ad_free_seconds = seconds;
        self
    }

    /// Set the grant file
    pub fn with_grant_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.grant_file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.ad_free_seconds, 300);
        assert!(config.grant_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = ClientConfig::new("http://localhost:5000/api");
        assert_eq!(config.base_url().unwrap().as_str(), "http://localhost:5000/api/");

        let config = ClientConfig::new("http://127.0.0.1:1234");
        assert_eq!(config.base_url().unwrap().as_str(), "http://127.0.0.1:1234/");
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("ftp://example.com").validate().is_err());
        assert!(ClientConfig::default()
            .with_ad_free_seconds(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_zero_timeout_disables_timeout() {
        let config = ClientConfig::default().with_timeout_secs(0);
        assert_eq!(config.timeout(), None);
        assert!(config.http_client().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payg.json");
        std::fs::write(
            &path,
            r#"{"base_url": "https://pay.example.com/api", "ad_free_seconds": 600}"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.base_url, "https://pay.example.com/api");
        assert_eq!(config.ad_free_seconds, 600);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payg.json");
        std::fs::write(&path, r#"{"base_url": "localhost"}"#).unwrap();

        let err = ClientConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
    }
}
