//! Runtime configuration - TOML file plus environment overrides

use crate::error::{Error, Result};
use crate::logging::{self, LogConfig, LogFormat, LogOutput};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sizing policy of the identity cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// Initial bucket count, rounded up to a power of two
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,

    /// Reorganise once free buckets drop to capacity / this
    #[serde(default = "default_min_free_ratio")]
    pub min_free_ratio: usize,

    /// Grow when free + stale buckets are below capacity / this
    #[serde(default = "default_grow_ratio")]
    pub grow_ratio: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticsConfig {
    /// Prefix per-overload failures with the signature from the docstring
    #[serde(default = "default_true")]
    pub use_docstrings: bool,

    /// Emit a trace event for every rejected overload
    #[serde(default = "default_false")]
    pub log_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default = "default_false")]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_capacity(),
            min_free_ratio: default_min_free_ratio(),
            grow_ratio: default_grow_ratio(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            use_docstrings: true,
            log_failures: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: false,
            filter: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_capacity() -> usize { 512 }
fn default_min_free_ratio() -> usize { 8 }
fn default_grow_ratio() -> usize { 4 }
fn default_level() -> String { "info".to_string() }

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `BINDERY_*` environment overrides on top of this config
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(capacity) = std::env::var("BINDERY_IDENTITY_CAPACITY") {
            self.identity.initial_capacity = capacity.parse().map_err(|_| {
                Error::Config(format!("BINDERY_IDENTITY_CAPACITY is not a number: {}", capacity))
            })?;
        }
        if let Ok(flag) = std::env::var("BINDERY_USE_DOCSTRINGS") {
            self.diagnostics.use_docstrings = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(level) = std::env::var("BINDERY_LOG_LEVEL") {
            self.logging.level = level;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let identity = &self.identity;
        if identity.min_free_ratio < 2 {
            return Err(Error::Config("identity.min_free_ratio must be at least 2".into()));
        }
        if identity.grow_ratio < 2 || identity.grow_ratio > identity.min_free_ratio {
            return Err(Error::Config(
                "identity.grow_ratio must be between 2 and identity.min_free_ratio".into(),
            ));
        }
        if logging::parse_level(&self.logging.level).is_none() {
            return Err(Error::Config(format!("unknown log level '{}'", self.logging.level)));
        }
        Ok(())
    }

    pub fn log_config(&self) -> LogConfig {
        let section = &self.logging;
        LogConfig {
            level: logging::parse_level(&section.level).unwrap_or(tracing::Level::INFO),
            format: section.format,
            output: section.output.clone(),
            span_events: section.span_events,
            filter: section.filter.clone(),
        }
    }
}
