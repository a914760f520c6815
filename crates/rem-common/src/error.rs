//! Error types for R Environment Manager.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! Errors can be formatted for human consumption with headline, reason, and fix:
//! ```text
//! ✗ Command Failed
//!   Reason: command failed after 3 attempts: install nginx (exit 100)
//!   Fix: Inspect the log for the failing command's output, then retry.
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for R Environment Manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// External command execution errors (spawn, retry exhaustion, timeout).
    Command,
    /// Template lookup and rendering errors.
    Template,
    /// Backup session creation, restore, and verification errors.
    Backup,
    /// Settings and environment resolution errors.
    Config,
    /// Privilege and missing-tool errors.
    Privilege,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Command => write!(f, "command"),
            ErrorCategory::Template => write!(f, "template"),
            ErrorCategory::Backup => write!(f, "backup"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Privilege => write!(f, "privilege"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for R Environment Manager.
#[derive(Error, Debug)]
pub enum Error {
    // Command errors (10-19)
    #[error("command failed after {attempts} attempt(s): {description} (exit {})", fmt_exit(.exit_code))]
    CommandExhausted {
        description: String,
        attempts: u32,
        exit_code: Option<i32>,
    },

    #[error("command timed out after {seconds}s: {description}")]
    CommandTimeout { description: String, seconds: u64 },

    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("empty command line")]
    EmptyCommand,

    // Template errors (20-29)
    #[error("template not found: {}", .path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("template is not valid UTF-8: {}", .path.display())]
    TemplateEncoding { path: PathBuf },

    #[error("failed to write rendered file {}: {source}", .path.display())]
    RenderedWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Backup errors (30-39)
    #[error("could not create backup directory {}: {source}", .path.display())]
    BackupDirCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no backup sessions found under {}", .base.display())]
    NoSessions { base: PathBuf },

    #[error("backup session metadata corrupted: {0}")]
    SessionMetadata(String),

    // Config errors (40-49)
    #[error("invalid setting {name}={value}: {reason}")]
    InvalidSetting {
        name: String,
        value: String,
        reason: String,
    },

    // Privilege errors (50-59)
    #[error("root privileges required for {operation}")]
    RootRequired { operation: String },

    #[error("required tool not found on PATH: {tool}")]
    ToolMissing { tool: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Command errors
    /// - 20-29: Template errors
    /// - 30-39: Backup errors
    /// - 40-49: Config errors
    /// - 50-59: Privilege errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::CommandExhausted { .. } => 10,
            Error::CommandTimeout { .. } => 11,
            Error::SpawnFailed { .. } => 12,
            Error::EmptyCommand => 13,
            Error::TemplateNotFound { .. } => 20,
            Error::TemplateEncoding { .. } => 21,
            Error::RenderedWrite { .. } => 22,
            Error::BackupDirCreate { .. } => 30,
            Error::NoSessions { .. } => 31,
            Error::SessionMetadata(_) => 32,
            Error::InvalidSetting { .. } => 40,
            Error::RootRequired { .. } => 50,
            Error::ToolMissing { .. } => 51,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CommandExhausted { .. }
            | Error::CommandTimeout { .. }
            | Error::SpawnFailed { .. }
            | Error::EmptyCommand => ErrorCategory::Command,

            Error::TemplateNotFound { .. }
            | Error::TemplateEncoding { .. }
            | Error::RenderedWrite { .. } => ErrorCategory::Template,

            Error::BackupDirCreate { .. } | Error::NoSessions { .. } | Error::SessionMetadata(_) => {
                ErrorCategory::Backup
            }

            Error::InvalidSetting { .. } => ErrorCategory::Config,

            Error::RootRequired { .. } | Error::ToolMissing { .. } => ErrorCategory::Privilege,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// Recoverable errors may be resolved by:
    /// - Retrying with a delay
    /// - Fixing the environment (privileges, missing tools, disk space)
    /// - Creating a backup before restoring one
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Command: transient failures dominate (network, apt mirrors)
            Error::CommandExhausted { .. } => true,
            Error::CommandTimeout { .. } => true,
            Error::SpawnFailed { .. } => true,
            Error::EmptyCommand => false, // Caller bug

            // Template: the file is missing or broken until someone fixes it
            Error::TemplateNotFound { .. } => false,
            Error::TemplateEncoding { .. } => false,
            Error::RenderedWrite { .. } => true,

            Error::BackupDirCreate { .. } => true,
            Error::NoSessions { .. } => true, // Run a backup first
            Error::SessionMetadata(_) => false,

            Error::InvalidSetting { .. } => true,

            Error::RootRequired { .. } => true, // Re-run under sudo
            Error::ToolMissing { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => true,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::CommandExhausted { .. } => {
                "Inspect the log for the failing command's output, then retry. Persistent apt failures usually mean a mirror or dependency problem."
            }
            Error::CommandTimeout { .. } => {
                "The command was killed after exceeding its time limit. Re-run with REM_TIMEOUT_SECS raised if the operation is legitimately slow."
            }
            Error::SpawnFailed { .. } => {
                "Check that the program exists and is executable. 'rem check' reports missing tools."
            }
            Error::EmptyCommand => {
                "A command was constructed with no tokens. This is a bug in the caller; report it."
            }

            Error::TemplateNotFound { .. } => {
                "Check the template path. Templates ship in the templates/ directory next to the binary or under /etc/r_env_manager."
            }
            Error::TemplateEncoding { .. } => {
                "Templates must be UTF-8 text. Re-save the file without a legacy encoding."
            }
            Error::RenderedWrite { .. } => {
                "Check permissions and free space on the destination filesystem."
            }

            Error::BackupDirCreate { .. } => {
                "Check permissions on /var/backups and free disk space."
            }
            Error::NoSessions { .. } => {
                "No snapshot exists yet. Create one with 'rem backup create' before restoring."
            }
            Error::SessionMetadata(_) => {
                "The session.json sidecar is unreadable. Restore from an older session or inspect the file by hand."
            }

            Error::InvalidSetting { .. } => {
                "Fix the environment variable or command-line flag named in the message."
            }

            Error::RootRequired { .. } => {
                "Re-run with elevated privileges: 'sudo rem <command>'."
            }
            Error::ToolMissing { .. } => {
                "Install the missing tool with your package manager, then retry."
            }

            Error::Io(_) => {
                "Check disk space, permissions, and that target directories exist. Retry the operation."
            }
            Error::Json(_) => {
                "Invalid JSON in a metadata file. Inspect it with 'jq .' or delete the affected session."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::CommandExhausted { .. } => "Command Failed",
            Error::CommandTimeout { .. } => "Command Timed Out",
            Error::SpawnFailed { .. } => "Could Not Start Command",
            Error::EmptyCommand => "Empty Command",

            Error::TemplateNotFound { .. } => "Template Not Found",
            Error::TemplateEncoding { .. } => "Template Encoding Error",
            Error::RenderedWrite { .. } => "Rendered File Write Failed",

            Error::BackupDirCreate { .. } => "Backup Directory Error",
            Error::NoSessions { .. } => "No Backup Sessions",
            Error::SessionMetadata(_) => "Backup Metadata Corrupted",

            Error::InvalidSetting { .. } => "Invalid Setting",

            Error::RootRequired { .. } => "Root Privileges Required",
            Error::ToolMissing { .. } => "Missing Tool",

            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
