//! Runtime settings resolution.
//!
//! Flags win over `REM_*` environment variables, which win over built-in
//! defaults. A malformed environment value is logged and ignored rather than
//! aborting the run; the command line is the place for strictness.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::warn;

use rem_common::{env as env_names, SystemPaths};
use rem_engine::context::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
use rem_engine::{EngineContext, RunnerSettings};

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Pretty-printed JSON on stdout.
    Json,
}

/// Global options available to all commands.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Alternate filesystem root (testing and staged images)
    #[arg(long, global = true, env = env_names::SYSROOT, value_name = "DIR")]
    pub sysroot: Option<PathBuf>,

    /// Maximum attempts per command
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: Option<u32>,

    /// Hard timeout per command attempt, in seconds
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Connect commands to the terminal (stdin included)
    #[arg(long, global = true)]
    pub interactive: bool,

    /// Answer yes to confirmation prompts
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "human")]
    pub format: OutputFormat,

    /// Console log format (human|jsonl)
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease verbosity (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: SystemPaths,
    pub retries: u32,
    pub timeout: Duration,
    pub interactive: bool,
    pub assume_yes: bool,
    pub main_log: Option<PathBuf>,
    pub format: OutputFormat,
    engine: Arc<EngineContext>,
}

impl Settings {
    /// Merge flags, environment, and defaults.
    pub fn resolve(global: &GlobalOpts) -> Self {
        let retries = global
            .retries
            .or_else(|| env_u64(env_names::RETRIES).map(|v| v as u32))
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let timeout = global
            .timeout
            .or_else(|| env_u64(env_names::TIMEOUT_SECS))
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let interactive = global.interactive || env_flag(env_names::INTERACTIVE);
        let assume_yes = global.yes || env_flag(env_names::ASSUME_YES);

        let sysroot = global
            .sysroot
            .clone()
            .unwrap_or_else(|| PathBuf::from("/"));

        let main_log = std::env::var_os(env_names::MAIN_LOG).map(PathBuf::from);

        let paths = SystemPaths::new(sysroot);
        let engine = Arc::new(EngineContext::new(
            paths.clone(),
            RunnerSettings {
                retries,
                timeout,
                retry_delay: DEFAULT_RETRY_DELAY,
                interactive,
            },
        ));

        Settings {
            paths,
            retries,
            timeout,
            interactive,
            assume_yes,
            main_log,
            format: global.format,
            engine,
        }
    }

    /// The engine context shared by every operation in this run. One context
    /// per process keeps its one-shot state (package pre-check, backup
    /// session) spanning menu iterations.
    pub fn engine_context(&self) -> Arc<EngineContext> {
        Arc::clone(&self.engine)
    }
}

/// Parse a numeric environment variable; a malformed value is logged and
/// treated as unset.
fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring invalid {name}={raw}");
            None
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| env_names::is_truthy(&v))
        .unwrap_or(false)
}
