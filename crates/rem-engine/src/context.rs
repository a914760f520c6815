//! Shared engine state.
//!
//! One [`EngineContext`] is built at startup from resolved settings and passed
//! to every component. It owns path resolution and the per-process one-shot
//! flags that make repeated package operations cheap.

use rem_common::SystemPaths;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Default retry count for failed commands.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default hard timeout per command attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Fixed delay between retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Execution defaults applied when a command does not override them.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Maximum attempts per command (at least 1).
    pub retries: u32,

    /// Hard timeout per attempt.
    pub timeout: Duration,

    /// Delay between attempts.
    pub retry_delay: Duration,

    /// Connect commands to the terminal instead of capturing output.
    pub interactive: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            interactive: false,
        }
    }
}

/// Shared state for one engine run.
#[derive(Debug)]
pub struct EngineContext {
    pub paths: SystemPaths,
    pub runner: RunnerSettings,
    nodoc_written: AtomicBool,
    pkg_health_done: AtomicBool,
    backup_session: Mutex<Option<PathBuf>>,
}

impl EngineContext {
    pub fn new(paths: SystemPaths, runner: RunnerSettings) -> Self {
        Self {
            paths,
            runner,
            nodoc_written: AtomicBool::new(false),
            pkg_health_done: AtomicBool::new(false),
            backup_session: Mutex::new(None),
        }
    }

    /// Slot holding this run's backup session directory, once created.
    pub(crate) fn backup_session_slot(&self) -> &Mutex<Option<PathBuf>> {
        &self.backup_session
    }

    /// Mark the dpkg nodoc drop-in as written; returns false if it already was.
    pub(crate) fn mark_nodoc_written(&self) -> bool {
        !self.nodoc_written.swap(true, Ordering::SeqCst)
    }

    /// Mark the package health pre-check as done; returns false if it already ran.
    pub(crate) fn mark_pkg_health_done(&self) -> bool {
        !self.pkg_health_done.swap(true, Ordering::SeqCst)
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(SystemPaths::default(), RunnerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_flags_trip_once() {
        let ctx = EngineContext::default();
        assert!(ctx.mark_nodoc_written());
        assert!(!ctx.mark_nodoc_written());
        assert!(ctx.mark_pkg_health_done());
        assert!(!ctx.mark_pkg_health_done());
    }

    #[test]
    fn test_runner_defaults() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert!(!settings.interactive);
    }
}
