//! Engine configuration.
//!
//! Loaded via the `config` crate from environment variables prefixed with
//! `CARDFLOW`, or from a file. Nested keys use `__` as the separator, e.g.
//! `CARDFLOW__MAX_STEPS=500` or `CARDFLOW__REPAIR__MAX_ATTEMPTS=5`.

use crate::error::EngineError;
use cardflow_core::Result;
use cardflow_variable::{ContentConverter, ContentRepairer, DEFAULT_MAX_DEPTH, RepairConfig, Resolver};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Nesting budget for token resolution.
    #[serde(default = "default_max_resolution_depth")]
    pub max_resolution_depth: u32,

    /// Steps a single run may take before it is halted. Loop cycles make
    /// unbounded runs possible; `None` disables the ceiling.
    #[serde(default = "default_max_steps")]
    pub max_steps: Option<u64>,

    /// Artificial pause between node steps, for UI feedback.
    #[serde(default)]
    pub step_delay_ms: u64,

    /// Content repair throttling.
    #[serde(default)]
    pub repair: RepairConfig,
}

fn default_max_resolution_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_max_steps() -> Option<u64> {
    Some(10_000)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: default_max_resolution_depth(),
            max_steps: default_max_steps(),
            step_delay_ms: 0,
            repair: RepairConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::build(config::Config::builder().add_source(
            config::Environment::with_prefix("CARDFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Loads configuration from a TOML, JSON or YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::build(config::Config::builder().add_source(config::File::from(path.as_ref())))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, EngineError> {
        let config: Self = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| EngineError::Config { reason: e.to_string() })?;
        Ok(config)
    }

    /// The resolver configured with this depth budget.
    #[must_use]
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.max_resolution_depth)
    }

    /// A content converter sharing the resolver's depth budget.
    #[must_use]
    pub fn converter(&self) -> ContentConverter {
        ContentConverter::new(self.resolver())
    }

    /// A fresh repairer with the configured throttle.
    #[must_use]
    pub fn repairer(&self) -> ContentRepairer {
        ContentRepairer::new(self.repair.clone())
    }

    #[must_use]
    pub fn step_delay(&self) -> Option<Duration> {
        (self.step_delay_ms > 0).then(|| Duration::from_millis(self.step_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_resolution_depth, 5);
        assert_eq!(config.max_steps, Some(10_000));
        assert_eq!(config.step_delay(), None);
        assert_eq!(config.repair.max_attempts, 3);
        assert_eq!(config.repair.cooldown_ms, 5000);
    }

    #[test]
    fn loads_from_file_with_defaults_for_missing_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_steps = 50\nstep_delay_ms = 20\n\n[repair]\nmax_attempts = 1").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_steps, Some(50));
        assert_eq!(config.step_delay(), Some(Duration::from_millis(20)));
        assert_eq!(config.repair.max_attempts, 1);
        assert_eq!(config.repair.cooldown_ms, 5000);
        assert_eq!(config.max_resolution_depth, 5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::from_file(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn builds_converter_with_configured_depth() {
        let config = EngineConfig {
            max_resolution_depth: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.resolver().max_depth(), 0);
        let snapshot = cardflow_variable::VariableSnapshot::default();
        let output = config
            .converter()
            .to_output("<p>a &amp; b</p>", &snapshot, cardflow_variable::OutputMode::Text);
        assert_eq!(output.text.trim_end(), "a & b");
        assert_eq!(config.repairer().config().max_attempts, 3);
    }

    #[test]
    fn deserializes_from_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_steps": null}"#).unwrap();
        assert_eq!(config.max_steps, None);
    }
}
