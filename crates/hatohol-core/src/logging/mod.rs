//! Structured logging for hatohol-core.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for service deployments
//!
//! # Usage
//!
//! ```ignore
//! use hatohol_core::logging::{event_names, init_logging, LogConfig};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! tracing::info!(event = event_names::ARM_STARTED, server_id = 3, "arm started");
//! ```
//!
//! stdout is reserved for command payloads (JSON); all log output goes to
//! stderr.

pub mod config;
pub mod events;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::event_names;

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives for `config`. `RUST_LOG` wins when it parses.
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "hatohol_core={level},hatohol_common={level}",
            level = config.level
        ))
    })
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed (e.g. by a test harness).
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = env_filter(config);

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(config.thread_names)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(std::io::stderr)
                .with_thread_names(config.thread_names);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
        }
    };
    result.is_ok()
}

/// Initialize logging with defaults (for tests and simple cases).
pub fn init_default_logging() -> bool {
    init_logging(&LogConfig::from_env(None, None))
}
