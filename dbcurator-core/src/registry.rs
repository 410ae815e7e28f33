//! Connection registry backed by a JSON file.
//!
//! The file maps connection keys to client database profiles:
//!
//! ```json
//! {
//!   "traro_cases": {
//!     "dialect": "mariadb",
//!     "username": "obi",
//!     "password": "obi$2025",
//!     "host": "db.client.lan",
//!     "port": 3306,
//!     "dbname": "traro"
//!   }
//! }
//! ```
//!
//! A missing file is not fatal: the agent starts with an empty registry and
//! every keyed operation reports the key as unknown.

use crate::dsn::resolve_dsn;
use crate::error::AgentError;
use crate::models::ConnectionProfile;
use crate::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Registered client connections, keyed by connection key.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: BTreeMap<String, ConnectionProfile>,
}

impl ConnectionRegistry {
    /// Loads the registry from a JSON file.
    ///
    /// A missing file yields an empty registry with a warning. Anything
    /// else that goes wrong (unreadable file, malformed JSON, unknown
    /// dialect tag) is an error.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Registry`] with the failing path in context.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "connections file {} not found, starting with an empty registry",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AgentError::registry(
                    format!("cannot read connections file {}", path.display()),
                    e,
                ));
            }
        };

        let entries: BTreeMap<String, ConnectionProfile> = serde_json::from_str(&raw)
            .map_err(|e| {
                AgentError::registry(
                    format!("connections file {} is malformed", path.display()),
                    e,
                )
            })?;

        tracing::info!(
            "loaded {} connection(s) from {}",
            entries.len(),
            path.display()
        );
        Ok(Self { entries })
    }

    /// Builds a registry from in-memory entries.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, ConnectionProfile>) -> Self {
        Self { entries }
    }

    /// Looks up a profile by connection key.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConnectionNotFound`] listing the known keys.
    pub fn get(&self, key: &str) -> Result<&ConnectionProfile> {
        self.entries
            .get(key)
            .ok_or_else(|| AgentError::connection_not_found(key, self.entries.keys()))
    }

    /// All entries in key order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &ConnectionProfile)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Registered keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First connection whose profile resolves to a usable DSN.
    ///
    /// A convenience for interactive listings; execution paths always take
    /// an explicit key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the registry is empty or no entry
    /// resolves.
    pub fn any_valid(&self) -> Result<(&str, &ConnectionProfile)> {
        if self.entries.is_empty() {
            return Err(AgentError::configuration(
                "connection registry is empty".to_string(),
            ));
        }

        for (key, profile) in &self.entries {
            match resolve_dsn(profile) {
                Ok(_) => return Ok((key.as_str(), profile)),
                Err(e) => {
                    tracing::warn!("connection '{}' does not resolve: {}", key, e);
                }
            }
        }

        Err(AgentError::configuration(
            "no registered connection resolves to a usable DSN".to_string(),
        ))
    }
}
