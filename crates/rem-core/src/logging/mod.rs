//! Dual-sink logging for the `rem` binary.
//!
//! Two sinks see every event:
//! - Console: `tracing_subscriber::fmt` on stderr, filtered by the resolved
//!   level, colored only when stderr is a terminal.
//! - File: [`FileLayer`] appends `YYYY-MM-DD HH:MM:SS - LEVEL - message`
//!   lines under `/var/log/r_env_manager/`, always down to debug so command
//!   output and retry detail survive for later audit. A secondary "main" log
//!   (`REM_MAIN_LOG`) receives a copy of each line when configured.
//!
//! The operator watching the terminal and an auditor reading the file see
//! the same narrative; only the level floor differs.

pub mod config;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use layer::FileLayer;

use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. `primary` is
/// the durable log file; `secondary` mirrors it when set (REM_MAIN_LOG).
pub fn init_logging(config: &LogConfig, primary: PathBuf, secondary: Option<PathBuf>) {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    // The filtered file layer's type is tied to the subscriber stack it
    // joins, so each arm builds its own.
    match config.format {
        LogFormat::Human => {
            let file_layer = FileLayer::new(primary, secondary).with_filter(LevelFilter::DEBUG);
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(use_ansi)
                .without_time()
                .with_filter(console_filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .with(file_layer)
                .init();
        }
        LogFormat::Jsonl => {
            let file_layer = FileLayer::new(primary, secondary).with_filter(LevelFilter::DEBUG);
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter);

            tracing_subscriber::registry()
                .with(json_layer)
                .with(file_layer)
                .init();
        }
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    // First 12 hex chars are plenty for correlating one host's runs.
    format!("run-{}", &uuid.to_string()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }
}
