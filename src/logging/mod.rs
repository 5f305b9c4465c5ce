//! Logging infrastructure - structured tracing for the binding runtime
//!
//! Design: Uses `tracing` for structured, contextual events with:
//! - One helper per runtime event so field names stay consistent
//! - Zero-cost when disabled
//! - Console or daily-rotated file output through non-blocking writers
//! - Idempotent initialisation

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON objects for log shippers
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    /// Daily rotated files `<directory>/<prefix>.<date>`
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span enter/close events
    pub span_events: bool,
    /// Extra filter directives (e.g. "bindery::identity=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // BINDERY_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("BINDERY_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }

        // BINDERY_LOG_FORMAT: pretty, compact, json
        if let Ok(format) = std::env::var("BINDERY_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }

        // BINDERY_LOG_FILE: directory/prefix of the rotated log
        if let Ok(path) = std::env::var("BINDERY_LOG_FILE") {
            let path = std::path::Path::new(&path);
            let directory = path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| ".".to_string());
            let prefix = path
                .file_name()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "bindery.log".to_string());
            config.output = LogOutput::File { directory, prefix };
        }

        config.span_events = std::env::var("BINDERY_LOG_SPANS").is_ok();
        config
    }

    /// Minimal logging for hot paths
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            format: LogFormat::Compact,
            ..Self::default()
        }
    }

    /// Everything, including span events
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            span_events: true,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

pub(crate) fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging from the environment
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Initialize logging with a custom configuration
///
/// Returns the writer guard on first initialisation; keep it alive until
/// shutdown so buffered events are flushed. Later calls are no-ops.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let (writer, worker) = match &config.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File { directory, prefix } => {
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
        };
        guard = Some(worker);

        let filter = build_filter(&config);
        let spans = span_events(config.span_events);
        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(spans)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(spans)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(spans)
                .with_filter(filter)
                .boxed(),
        };

        // Another subscriber may already be installed by the host.
        let _ = tracing_subscriber::registry().with(layer).try_init();
    });
    guard
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bindery={}", config.level.as_str().to_lowercase())));

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .fold(base, |filter, directive| match directive.trim().parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    tracing::warn!(directive, "invalid filter directive");
                    filter
                }
            }),
        None => base,
    }
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

// ============================================================================
// Runtime events
// ============================================================================

/// Log creation of a wrapper for a native object
#[inline]
pub fn log_wrap(type_name: &str, address: usize, ownership: &str) {
    use tracing::trace;
    trace!(
        event = "wrap",
        native_type = type_name,
        address = format_args!("{:#x}", address),
        ownership,
        "Native object wrapped"
    );
}

/// Log a native object being released through its type
#[inline]
pub fn log_release(type_name: &str, address: usize) {
    use tracing::trace;
    trace!(
        event = "release",
        native_type = type_name,
        address = format_args!("{:#x}", address),
        "Native object released"
    );
}

/// Log a convertor producing a native value
#[inline]
pub fn log_type_conversion(from_type: &str, to_type: &str) {
    use tracing::trace;
    trace!(
        event = "type_conversion",
        from = from_type,
        to = to_type,
        "Type conversion performed"
    );
}

/// Log an ownership transition
#[inline]
pub fn log_transfer(type_name: &str, from: &str, to: &str) {
    use tracing::debug;
    debug!(
        event = "transfer",
        native_type = type_name,
        from,
        to,
        "Ownership transferred"
    );
}

/// Log `child` being attached to an owner
#[inline]
pub fn log_attach(child_type: &str, parent_type: &str) {
    use tracing::trace;
    trace!(
        event = "attach",
        child = child_type,
        parent = parent_type,
        "Wrapper attached to owner"
    );
}

/// Log `child` being unlinked from its owner
#[inline]
pub fn log_detach(child_type: &str) {
    use tracing::trace;
    trace!(event = "detach", child = child_type, "Wrapper detached from owner");
}

/// Log a wrapper entering the identity cache
#[inline]
pub fn log_identity_insert(type_name: &str, address: usize, alias: bool, invalidated: usize) {
    use tracing::trace;
    trace!(
        event = "identity_insert",
        native_type = type_name,
        address = format_args!("{:#x}", address),
        alias,
        invalidated,
        "Identity registered"
    );
}

/// Log a wrapper leaving the identity cache
#[inline]
pub fn log_identity_remove(type_name: &str, address: usize) {
    use tracing::trace;
    trace!(
        event = "identity_remove",
        native_type = type_name,
        address = format_args!("{:#x}", address),
        "Identity removed"
    );
}

/// Log a native object being staged for the next construction
#[inline]
pub fn log_pending_stage(address: usize, depth: usize) {
    use tracing::trace;
    trace!(
        event = "pending_stage",
        address = format_args!("{:#x}", address),
        depth,
        "Native object staged"
    );
}

/// Log a constructor claiming the staged native object
#[inline]
pub fn log_pending_take(address: usize) {
    use tracing::trace;
    trace!(
        event = "pending_take",
        address = format_args!("{:#x}", address),
        "Staged native object taken"
    );
}

/// Log an identity cache reorganisation
pub fn log_identity_reorganise(old_capacity: usize, new_capacity: usize, live: usize) {
    use tracing::debug;
    debug!(
        event = "identity_reorganise",
        old_capacity,
        new_capacity,
        live_entries = live,
        "Identity cache reorganised"
    );
}

/// Log one candidate signature rejecting the arguments
pub fn log_parse_failure(candidate: usize, reason: &str) {
    use tracing::trace;
    trace!(
        event = "parse_failure",
        candidate,
        reason,
        "Overload rejected arguments"
    );
}

/// Log a failure that stops the overload search
pub fn log_parse_escalation(candidate: usize, error: &str) {
    use tracing::debug;
    debug!(
        event = "parse_escalation",
        candidate,
        error,
        "Argument parsing raised"
    );
}

/// Log a conversion of the matched candidate failing
pub fn log_parse_conversion_error(candidate: usize, error: &str) {
    use tracing::debug;
    debug!(
        event = "parse_conversion_error",
        candidate,
        error,
        "Conversion of matched arguments failed"
    );
}

/// Log an error that cannot be propagated to a caller
pub fn log_runtime_error(error: &str) {
    use tracing::error;
    error!(
        event = "runtime_error",
        error,
        "Runtime error occurred"
    );
}

/// Log a dynamic override returning something unusable
pub fn log_bad_result(method: &str, error: &str) {
    use tracing::error;
    error!(
        event = "bad_result",
        method,
        error,
        "Invalid result from dynamic override"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.output, LogOutput::Stderr);

        assert_eq!(LogConfig::performance().level, Level::ERROR);
        assert!(LogConfig::debug().span_events);
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_filter("bindery::identity=trace");
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("bindery::identity=trace"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_init_idempotent() {
        let _guard = init_with_config(LogConfig::performance());
        let second = init_with_config(LogConfig::debug());
        assert!(second.is_none());
        assert!(is_initialized());
    }
}
