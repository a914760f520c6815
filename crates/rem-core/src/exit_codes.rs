//! Exit codes for the `rem` CLI.
//!
//! Exit codes communicate operation outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

use rem_common::Error;

/// Exit codes for `rem` operations.
///
/// These codes are a stable contract for automation and wrapper scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run, system converged.
    Success = 0,

    /// The operation ran, but some items failed or checks found issues.
    CompletedWithWarnings = 1,

    /// The operation failed (command exhausted retries, restore found
    /// nothing to restore, render could not produce output).
    OperationFailed = 2,

    /// Invalid arguments or settings.
    ArgsError = 10,

    /// Root privileges required and absent.
    PrivilegeError = 11,

    /// A required system tool is missing from PATH.
    MissingTool = 12,

    /// Internal error (bug - please report).
    InternalError = 20,

    /// I/O error.
    IoError = 21,

    /// A command exceeded its hard timeout.
    TimeoutError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0-1 leave the system in a usable state.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Success | ExitCode::CompletedWithWarnings)
    }

    /// Codes 10-19 can be resolved by user action.
    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    /// Codes 20-29 indicate bugs and should be reported.
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::CompletedWithWarnings => "OK_WITH_WARNINGS",
            ExitCode::OperationFailed => "ERR_OPERATION",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::PrivilegeError => "ERR_PRIVILEGE",
            ExitCode::MissingTool => "ERR_TOOL",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::EmptyCommand | Error::InvalidSetting { .. } => ExitCode::ArgsError,
            Error::RootRequired { .. } => ExitCode::PrivilegeError,
            Error::ToolMissing { .. } => ExitCode::MissingTool,
            Error::CommandTimeout { .. } => ExitCode::TimeoutError,
            Error::BackupDirCreate { .. } => ExitCode::IoError,
            Error::Io(_) => ExitCode::IoError,
            Error::Json(_) => ExitCode::InternalError,
            _ => ExitCode::OperationFailed,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
