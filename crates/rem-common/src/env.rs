//! Environment variable names understood by the `rem` binary.
//!
//! Resolution order everywhere is command line, then environment, then
//! built-in default.

/// Default retry count for failed commands.
pub const RETRIES: &str = "REM_RETRIES";

/// Default hard timeout, in seconds, for a single command attempt.
pub const TIMEOUT_SECS: &str = "REM_TIMEOUT_SECS";

/// When set to `1`/`true`, commands inherit the terminal's stdin.
pub const INTERACTIVE: &str = "REM_INTERACTIVE";

/// Secondary log sink; every durable log line is mirrored here.
pub const MAIN_LOG: &str = "REM_MAIN_LOG";

/// Log level for the console (error|warn|info|debug|trace).
pub const LOG: &str = "REM_LOG";

/// Console log format (text|json).
pub const LOG_FORMAT: &str = "REM_LOG_FORMAT";

/// Alternate filesystem root; every system path is resolved beneath it.
pub const SYSROOT: &str = "REM_SYSROOT";

/// When set to `1`/`true`, confirmation prompts are answered yes.
pub const ASSUME_YES: &str = "REM_ASSUME_YES";

/// Parse a boolean-ish environment value (`1`, `true`, `yes`, `on`).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("YES"));
        assert!(is_truthy(" on "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
