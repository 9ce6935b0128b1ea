#![forbid(unsafe_code)]

//! History configuration.
//!
//! Every field has a default, so partial documents are fine:
//!
//! ```toml
//! # history.toml
//! max_length = 200
//! delay_ms = 16
//! ```
//!
//! ```rust,ignore
//! let config = HistoryConfig::from_toml_file("history.toml")?;
//! let config = HistoryConfig::from_json_str(r#"{"use_chunks": false}"#)?;
//! ```

#[cfg(feature = "config-file")]
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`History`](crate::History).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of entries reachable by undo.
    pub max_length: usize,
    /// Silence window for coalesced pushes, in milliseconds.
    pub delay_ms: u64,
    /// Decompose states into shared chunks. When `false`, every slot holds
    /// its own copy of the state and nothing is serialized.
    pub use_chunks: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_length: 100,
            delay_ms: 50,
            use_chunks: true,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn new(max_length: usize, delay: Duration) -> Self {
        Self {
            max_length,
            delay_ms: duration_to_ms(delay),
            use_chunks: true,
        }
    }

    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = duration_to_ms(delay);
        self
    }

    #[must_use]
    pub fn with_chunks(mut self, use_chunks: bool) -> Self {
        self.use_chunks = use_chunks;
        self
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Check parameters. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_length == 0 {
            errors.push("max_length must be at least 1".to_string());
        }
        errors
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Json)?;
        config.checked()
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(ConfigError::Toml)?;
        config.checked()
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    fn checked(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn duration_to_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Errors from loading a [`HistoryConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[cfg(feature = "config-file")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
