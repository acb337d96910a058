//! Engine configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! default_timeout_ms = 2000
//! isolation = "thread"
//!
//! [limits]
//! max_steps = 500000
//! ```

use fte_context::{Normalizer, DEFAULT_MAX_DEPTH, DEFAULT_TRANSIENT_KEYS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::journal::DEFAULT_JOURNAL_CAPACITY;
use crate::sandbox::{IsolationLevel, SandboxLimits};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Wall-clock budget per execution unless a version overrides it
    pub default_timeout_ms: u64,
    /// Frames on the resolution stack
    pub max_resolution_depth: usize,
    pub isolation: IsolationLevel,
    /// Program started as `<program> sandbox-worker`
    pub worker_program: Option<PathBuf>,
    /// Context keys dropped before fingerprinting
    pub transient_keys: Vec<String>,
    /// Context nesting ceiling
    pub max_context_depth: usize,
    /// Journal entries retained in memory before the oldest are dropped
    pub journal_capacity: usize,
    pub limits: SandboxLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 2000,
            max_resolution_depth: 256,
            isolation: IsolationLevel::default(),
            worker_program: None,
            transient_keys: DEFAULT_TRANSIENT_KEYS.iter().map(|k| (*k).to_string()).collect(),
            max_context_depth: DEFAULT_MAX_DEPTH,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            limits: SandboxLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] or [`ConfigError::InvalidValue`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// I/O, parse and validation errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Reject zero budgets
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::invalid("default_timeout_ms", "must be positive"));
        }
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::invalid("max_resolution_depth", "must be positive"));
        }
        if self.max_context_depth == 0 {
            return Err(ConfigError::invalid("max_context_depth", "must be positive"));
        }
        if self.journal_capacity == 0 {
            return Err(ConfigError::invalid("journal_capacity", "must be positive"));
        }
        let limits = &self.limits;
        if limits.max_steps == 0 {
            return Err(ConfigError::invalid("limits.max_steps", "must be positive"));
        }
        if limits.max_collection_len == 0 {
            return Err(ConfigError::invalid("limits.max_collection_len", "must be positive"));
        }
        if limits.max_text_len == 0 {
            return Err(ConfigError::invalid("limits.max_text_len", "must be positive"));
        }
        if limits.max_depth == 0 {
            return Err(ConfigError::invalid("limits.max_depth", "must be positive"));
        }
        if limits.max_value_nodes == 0 {
            return Err(ConfigError::invalid("limits.max_value_nodes", "must be positive"));
        }
        if limits.max_value_depth == 0 {
            return Err(ConfigError::invalid("limits.max_value_depth", "must be positive"));
        }
        if self.transient_keys.iter().any(String::is_empty) {
            return Err(ConfigError::invalid("transient_keys", "keys must be non-empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Context normalizer for these settings
    #[must_use]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.transient_keys.iter().cloned(), self.max_context_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_document_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_timeout_ms = 150
            isolation = "thread"
            transient_keys = ["trace_id"]

            [limits]
            max_steps = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(150));
        assert_eq!(config.isolation, IsolationLevel::Thread);
        assert_eq!(config.limits.max_steps, 42);
        assert_eq!(config.limits.max_depth, SandboxLimits::default().max_depth);
        assert!(config.normalizer().is_transient("trace_id"));
        assert!(!config.normalizer().is_transient("user"));
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = EngineConfig::from_toml_str("default_timeout_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "default_timeout_ms", .. }
        ));
        let err = EngineConfig::from_toml_str("[limits]\nmax_steps = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "limits.max_steps", .. }
        ));
        let err = EngineConfig::from_toml_str("[limits]\nmax_value_nodes = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "limits.max_value_nodes", .. }
        ));
        let err = EngineConfig::from_toml_str("journal_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "journal_capacity", .. }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("timeout = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_resolution_depth = 8").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_resolution_depth, 8);
    }
}
