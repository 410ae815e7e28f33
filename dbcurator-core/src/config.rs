//! Agent configuration.
//!
//! One [`AgentConfig`] value is assembled at startup (CLI flags and
//! environment) and passed by reference to whatever needs it. There is no
//! process-global settings object.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Cloud catalog endpoint and credentials.
///
/// # Security
/// The token is masked in `Debug` output and never appears in logs or
/// error messages.
#[derive(Clone)]
pub struct CatalogConfig {
    /// Base URL, e.g. `https://catalog.example.com` (no trailing slash needed).
    pub base_url: String,
    /// Bearer token for `/api/schemas`, `/api/schema-tables`, `/api/translate`.
    pub token: String,
}

impl CatalogConfig {
    /// Base URL with any trailing slash removed.
    #[must_use]
    pub fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("base_url", &self.base_url)
            .field("token", &"****")
            .finish()
    }
}

/// Runtime settings for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Connections JSON file.
    pub registry_path: PathBuf,
    /// Draft store JSON file.
    pub drafts_path: PathBuf,
    /// Cloud catalog endpoint and token.
    pub catalog: CatalogConfig,
    /// Ceiling for establishing a client database connection.
    pub connect_timeout: Duration,
    /// Ceiling for one gateway statement.
    pub query_timeout: Duration,
    /// Ceiling for one catalog or translation HTTP call.
    pub http_timeout: Duration,
}

impl AgentConfig {
    /// Builds a config with default timeouts and draft store location.
    #[must_use]
    pub fn new(registry_path: PathBuf, catalog: CatalogConfig) -> Self {
        Self {
            registry_path,
            drafts_path: PathBuf::from("drafts.json"),
            catalog,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new(
            PathBuf::from("connections.json"),
            CatalogConfig {
                base_url: "https://catalog.example.com/".to_string(),
                token: "tok".to_string(),
            },
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert_eq!(config.drafts_path, PathBuf::from("drafts.json"));
        assert_eq!(config.catalog.trimmed_base(), "https://catalog.example.com");
    }

    #[test]
    fn test_catalog_debug_masks_token() {
        let catalog = CatalogConfig {
            base_url: "https://catalog.example.com".to_string(),
            token: "super-secret-token".to_string(),
        };
        let debug = format!("{catalog:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("****"));
    }
}
