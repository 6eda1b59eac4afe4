//! Tracing and logging support.
//!
//! Engine code logs through `tracing` macros with key/value fields
//! (`plugin`, `method`, `call`, `request`). Hosts that do not install their
//! own subscriber can use the helpers here.

pub use tracing::{self, debug, error, info, instrument, trace, warn};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable format with colors (default for development).
    Pretty,

    /// Compact single-line format.
    Compact,

    /// JSON format (recommended for hosts shipping logs elsewhere).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            // Host callbacks arrive on several threads
            thread_ids: true,
        }
    }
}

/// Initialize a subscriber with default settings.
///
/// No-op if a global subscriber is already installed.
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Enable debug logs (stale responses, listener changes)
/// - `RUST_LOG=callbridge_host=trace` - Per-event fan-out
pub fn init_subscriber() {
    if let Err(e) = init_subscriber_with_config(TracingConfig::default()) {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Initialize a subscriber with custom configuration.
///
/// # Example
///
/// ```no_run
/// use callbridge_host::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// let config = TracingConfig {
///     format: TracingFormat::Json,
///     ..Default::default()
/// };
/// init_subscriber_with_config(config).ok();
/// ```
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), TryInitError> {
    let filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => layer.pretty().boxed(),
        (TracingFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => layer.compact().boxed(),
        (TracingFormat::Compact, false) => layer.compact().without_time().boxed(),
        (TracingFormat::Json, true) => layer.json().boxed(),
        (TracingFormat::Json, false) => layer.json().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
}
