// Logging System for Looper
//
// This module provides a unified logging interface for loopers and their
// clients. It's built on top of the `tracing` ecosystem; the runtime itself
// only emits events, and applications pick an output by calling one of the
// `init*` functions below once at startup.
//
// # Usage Examples
//
// ```rust
// use looper::logging;
//
// // Human-readable console output at INFO level
// logging::init_default();
//
// // Or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     target_filters: Some("looper::thread=trace".to_string()),
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// Worker threads log lifecycle transitions (`running`, `stopped`, `exited`) at
// INFO, every drain and tick at TRACE, and an unclean drop at WARN.

use std::fs::OpenOptions;
use std::io;
use std::sync::{Mutex, Once};

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    filter::LevelFilter, fmt, prelude::*, registry::Registry, EnvFilter, Layer,
};

/// Configuration for the logging system
///
/// # Examples
///
/// ```rust
/// use looper::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     show_file_line: false,
///     show_thread_info: true,
///     show_time: true,
///     target_filters: Some("looper=debug,looper::thread::looper=trace".to_string()),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id; looper threads are named `looper-{name}`
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter =
        EnvFilter::from_default_env().add_directive(LevelFilter::from_level(config.level).into());

    if let Some(filters) = &config.target_filters {
        for filter_expr in filters.split(',') {
            if let Ok(directive) = filter_expr.trim().parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

fn console_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    if config.json_format {
        return fmt::layer()
            .json()
            .flatten_event(true)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info)
            .boxed();
    }

    let layer = fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info);

    if config.show_time {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    }
}

/// Initialize the logging system with the given configuration
///
/// It's safe to call multiple times; only the first call will take effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::registry()
            .with(console_layer(&config))
            .with(env_filter(&config));

        set_global_subscriber(subscriber);
    });
}

// Helper function to set the global subscriber
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Initialize logging with both console and file output
///
/// The file is opened in append mode (created if missing) before anything is
/// installed, so a bad path is reported instead of silently dropping logs.
/// File output never uses ANSI colors and always carries file/line and thread
/// information.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    INIT.call_once(|| {
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(console_layer(&config))
            .with(file_layer)
            .with(env_filter(&config));

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// Initialize default logging: INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// Initialize logging optimized for development environments
///
/// DEBUG everywhere and TRACE for the looper runtime, so drains and ticks show up.
pub fn init_development() {
    let config = LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("looper=debug,looper::thread=trace".to_string()),
    };
    init(config);
}

/// Initialize logging optimized for production environments
///
/// JSON output for log aggregators, no file/line information.
pub fn init_production() {
    let config = LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    };
    init(config);
}

/// Initialize logging for testing
///
/// Only warnings and errors, without thread info or timestamps.
pub fn init_test() {
    let config = LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    };
    init(config);
}

/// Create a span tagged with a looper's name
///
/// # Examples
///
/// ```rust
/// let span = looper::looper_span!("physics");
/// let _guard = span.enter();
///
/// let span = looper::looper_span!("net", category = "net");
/// ```
#[macro_export]
macro_rules! looper_span {
    ($looper:expr) => {
        $crate::tracing::info_span!("looper", looper = $looper)
    };
    ($looper:expr, $($fields:tt)*) => {
        $crate::tracing::info_span!("looper", looper = $looper, $($fields)*)
    };
}

/// Log looper lifecycle transitions
///
/// # Examples
///
/// ```rust
/// looper::log_lifecycle!("physics", "running");
/// looper::log_lifecycle!("physics", "stopped", dropped = 3);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($looper:expr, $event:expr) => {
        $crate::tracing::info!(looper = $looper, event = $event)
    };
    ($looper:expr, $event:expr, $($fields:tt)*) => {
        $crate::tracing::info!(looper = $looper, event = $event, $($fields)*)
    };
}

/// Log processing of one pending item
///
/// # Examples
///
/// ```rust
/// looper::log_dispatch!("event", 12, name = "add");
/// ```
#[macro_export]
macro_rules! log_dispatch {
    ($kind:expr, $id:expr) => {
        $crate::tracing::trace!(kind = $kind, seq = $id)
    };
    ($kind:expr, $id:expr, $($fields:tt)*) => {
        $crate::tracing::trace!(kind = $kind, seq = $id, $($fields)*)
    };
}

/// Log error events
///
/// # Examples
///
/// ```rust
/// let error = looper::LooperError::Stopped;
/// looper::log_error!(error, looper = "physics");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        $crate::tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        $crate::tracing::error!(error = %$error, $($fields)*)
    };
}

/// Get the current tracing dispatcher
///
/// Useful for threads that should log with the same configuration as their parent.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
        assert!(config.target_filters.is_none());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        init_default();
        crate::log_lifecycle!("logging-test", "initialized");
    }

    #[test]
    fn test_env_filter_accepts_target_directives() {
        let config = LogConfig {
            target_filters: Some("looper=debug, looper::thread=trace,not a directive".to_string()),
            ..Default::default()
        };
        let filter = env_filter(&config);
        assert!(filter.to_string().contains("looper::thread=trace"));
    }
}
