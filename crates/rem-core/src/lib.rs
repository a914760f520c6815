//! R Environment Manager CLI internals.
//!
//! The `rem` binary is a thin orchestration layer over [`rem_engine`]: it
//! parses the command line, resolves settings from flags and `REM_*`
//! environment variables, initializes dual-sink logging, and dispatches to
//! one command handler per operation. Run without a subcommand on a terminal
//! it presents the interactive menu instead.

pub mod commands;
pub mod exit_codes;
pub mod logging;
pub mod menu;
pub mod settings;

pub use exit_codes::ExitCode;
pub use settings::Settings;
