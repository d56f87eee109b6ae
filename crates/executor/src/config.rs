//! Configuration via `quill.toml`
//!
//! Settings that tune execution without code changes. Everything has a
//! default, so an empty file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quill_core::{Error, Result};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "quill.toml";

/// Cache section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    /// Use an in-process cache; `false` installs a store that caches nothing
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Execution configuration loaded from `quill.toml`.
///
/// # Example
///
/// ```toml
/// debug_messages = false
/// command_timeout_secs = 30
/// slow_statement_ms = 500
/// transaction_timeout_secs = 60
///
/// [cache]
/// enabled = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuillConfig {
    /// Include SQL and parameters in not-found messages
    #[serde(default)]
    pub debug_messages: bool,
    /// Default statement timeout; unset leaves it to the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    /// Statements slower than this are logged at warn level
    #[serde(default = "default_slow_statement_ms")]
    pub slow_statement_ms: u64,
    /// Timeout for scopes that do not name one; 0 means unbounded
    #[serde(default = "default_transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,
    /// Cache settings
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_true() -> bool {
    true
}

fn default_slow_statement_ms() -> u64 {
    500
}

fn default_transaction_timeout_secs() -> u64 {
    60
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            debug_messages: false,
            command_timeout_secs: None,
            slow_statement_ms: default_slow_statement_ms(),
            transaction_timeout_secs: default_transaction_timeout_secs(),
            cache: CacheSettings::default(),
        }
    }
}

impl QuillConfig {
    /// Default statement timeout
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Slow statement threshold
    pub fn slow_statement_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_statement_ms)
    }

    /// Default transaction timeout
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Quill configuration
#
# Include SQL text and parameters in "entity does not exist" messages.
# Leave off in production.
debug_messages = false

# Default statement timeout in seconds (unset = driver default)
# command_timeout_secs = 30

# Statements slower than this many milliseconds are logged as warnings
slow_statement_ms = 500

# Timeout for transaction scopes that do not name one (0 = unbounded)
transaction_timeout_secs = 60

[cache]
# false = nothing is cached, every request runs its statements
enabled = true
"#
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::configuration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::configuration(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = QuillConfig::default();
        assert!(!config.debug_messages);
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.slow_statement_threshold(), Duration::from_millis(500));
        assert_eq!(config.transaction_timeout(), Duration::from_secs(60));
        assert!(config.cache.enabled);
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config = QuillConfig::from_toml_str(QuillConfig::default_toml()).unwrap();
        assert_eq!(config, QuillConfig::default());
    }

    #[test]
    fn empty_file_is_valid() {
        assert_eq!(QuillConfig::from_toml_str("").unwrap(), QuillConfig::default());
    }

    #[test]
    fn parse_overrides() {
        let config = QuillConfig::from_toml_str(
            "debug_messages = true\ncommand_timeout_secs = 5\n[cache]\nenabled = false\n",
        )
        .unwrap();
        assert!(config.debug_messages);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(5)));
        assert!(!config.cache.enabled);
        assert_eq!(config.slow_statement_ms, 500);
    }

    #[test]
    fn parse_invalid_returns_configuration_error() {
        let err = QuillConfig::from_toml_str("slow_statement_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = QuillConfig {
            debug_messages: true,
            command_timeout_secs: Some(12),
            ..QuillConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(QuillConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = QuillConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
