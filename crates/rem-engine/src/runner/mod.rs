//! Command execution with bounded retries and hard timeouts.
//!
//! This module runs every external command the engine touches, with the
//! safety controls an unattended provisioning run needs:
//!
//! - Bounded retries with a fixed delay between attempts
//! - Per-attempt timeout with SIGTERM → SIGKILL escalation
//! - Live output: child stdout/stderr reach the console as they are
//!   produced and land in the durable log at debug level
//! - Package-manager invocations are prepared for unattended execution
//!   before the first attempt (see [`pkg`])
//!
//! Failure is data, not an early return: [`CommandRunner::run`] always
//! produces a [`CommandResult`], and callers that want `?` semantics use
//! [`CommandRunner::run_checked`].

pub mod lock;
pub mod pkg;
pub mod spec;

use crate::context::EngineContext;
use lock::{AdvisoryLockProbe, LockInspector};
use rem_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, IsTerminal, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub use spec::{CommandKind, CommandSpec};

/// How often the wait loop polls a running child.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Grace period between SIGTERM and SIGKILL.
const SIGTERM_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for output pipes to reach EOF after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Cap on captured probe output.
const CAPTURE_LIMIT: u64 = 64 * 1024;

/// Outcome of running a [`CommandSpec`], retries included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// The spec's description, echoed back for reporting.
    pub description: String,

    /// Attempts actually spent (across compound parts, summed).
    pub attempts_used: u32,

    /// Exit code of the final attempt; `None` when killed by a signal.
    pub exit_code: Option<i32>,

    /// Whether the final attempt hit its timeout.
    pub timed_out: bool,

    /// Wall time across all attempts.
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    pub success: bool,
}

/// Output of a short internal probe run through [`CommandRunner::capture`].
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Where a child's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputMode {
    /// Echo lines to the console and the debug log as they arrive.
    Stream,
    /// Collect output for the caller; nothing reaches the console.
    Capture,
    /// Hand the terminal to the child (interactive commands).
    Inherit,
}

/// A fully resolved invocation, ready to spawn.
#[derive(Debug, Clone)]
pub(crate) struct PreparedInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
    pub mode: OutputMode,
}

/// What a single attempt did.
#[derive(Debug, Default)]
pub(crate) struct AttemptOutcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub spawn_error: Option<String>,
}

impl AttemptOutcome {
    fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Executes commands under the context's defaults.
pub struct CommandRunner {
    ctx: Arc<EngineContext>,
    inspector: Box<dyn LockInspector>,
}

impl CommandRunner {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            inspector: Box::new(AdvisoryLockProbe),
        }
    }

    /// Replace the lock probe (tests).
    pub fn with_inspector(mut self, inspector: Box<dyn LockInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub(crate) fn inspector(&self) -> &dyn LockInspector {
        self.inspector.as_ref()
    }

    /// Run a command to completion, retries included.
    pub fn run(&self, spec: &CommandSpec) -> CommandResult {
        match &spec.kind {
            CommandKind::Compound { parts } => self.run_compound(spec, parts),
            CommandKind::PackageManager(inv) => {
                let prepared = self.prepare_pkg(inv, spec);
                self.run_prepared(spec, prepared)
            }
            CommandKind::Generic { argv } => {
                let prepared = PreparedInvocation {
                    program: argv[0].clone(),
                    args: argv[1..].to_vec(),
                    envs: Vec::new(),
                    timeout: spec.timeout.unwrap_or(self.ctx.runner.timeout),
                    mode: self.output_mode(spec),
                };
                self.run_prepared(spec, prepared)
            }
        }
    }

    /// Like [`run`](Self::run), but non-success becomes an [`Error`].
    pub fn run_checked(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let result = self.run(spec);
        if result.success {
            Ok(result)
        } else if result.timed_out {
            Err(Error::CommandTimeout {
                description: result.description,
                seconds: result.duration.as_secs(),
            })
        } else {
            Err(Error::CommandExhausted {
                description: result.description.clone(),
                attempts: result.attempts_used,
                exit_code: result.exit_code,
            })
        }
    }

    /// Run a short probe and hand its output back. No retries, no console
    /// echo; used for `systemctl is-active` style questions.
    pub fn capture(
        &self,
        description: &str,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CapturedOutput> {
        if argv.is_empty() {
            return Err(Error::EmptyCommand);
        }
        debug!("probing: {} ({:?})", description, argv);
        let prepared = PreparedInvocation {
            program: argv[0].to_string(),
            args: argv[1..].iter().map(|s| s.to_string()).collect(),
            envs: Vec::new(),
            timeout,
            mode: OutputMode::Capture,
        };
        let outcome = self.attempt(&prepared);
        if let Some(reason) = outcome.spawn_error {
            return Err(Error::SpawnFailed {
                program: prepared.program,
                reason,
            });
        }
        if outcome.timed_out {
            return Err(Error::CommandTimeout {
                description: description.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        Ok(CapturedOutput {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout.unwrap_or_default(),
            stderr: outcome.stderr.unwrap_or_default(),
        })
    }

    fn output_mode(&self, spec: &CommandSpec) -> OutputMode {
        if spec.interactive || self.ctx.runner.interactive {
            OutputMode::Inherit
        } else {
            OutputMode::Stream
        }
    }

    fn run_compound(&self, spec: &CommandSpec, parts: &[CommandSpec]) -> CommandResult {
        let started = Instant::now();
        let mut attempts_total = 0;

        for part in parts {
            // Parts inherit overrides they don't set themselves.
            let mut part = part.clone();
            part.timeout = part.timeout.or(spec.timeout);
            part.retries = part.retries.or(spec.retries);
            part.interactive |= spec.interactive;

            let result = self.run(&part);
            attempts_total += result.attempts_used;
            if !result.success {
                warn!(
                    "stopping {}: step failed: {}",
                    spec.description, part.description
                );
                return CommandResult {
                    description: spec.description.clone(),
                    attempts_used: attempts_total,
                    exit_code: result.exit_code,
                    timed_out: result.timed_out,
                    duration: started.elapsed(),
                    success: false,
                };
            }
        }

        CommandResult {
            description: spec.description.clone(),
            attempts_used: attempts_total,
            exit_code: Some(0),
            timed_out: false,
            duration: started.elapsed(),
            success: true,
        }
    }

    fn run_prepared(&self, spec: &CommandSpec, prepared: PreparedInvocation) -> CommandResult {
        let max_attempts = spec.retries.unwrap_or(self.ctx.runner.retries).max(1);
        let delay = self.ctx.runner.retry_delay;
        let started = Instant::now();
        let mut last = AttemptOutcome::default();

        for attempt in 1..=max_attempts {
            info!(
                "running: {} (attempt {}/{})",
                spec.description, attempt, max_attempts
            );
            debug!(
                program = %prepared.program,
                args = ?prepared.args,
                timeout_s = prepared.timeout.as_secs(),
                "spawning"
            );

            let outcome = self.attempt(&prepared);

            if let Some(reason) = &outcome.spawn_error {
                error!("failed to start {}: {}", prepared.program, reason);
            }
            if outcome.timed_out {
                warn!(
                    "timed out after {}s: {}",
                    prepared.timeout.as_secs(),
                    spec.description
                );
            }
            if outcome.success() {
                info!(
                    "succeeded: {} ({} ms)",
                    spec.description,
                    started.elapsed().as_millis()
                );
                return CommandResult {
                    description: spec.description.clone(),
                    attempts_used: attempt,
                    exit_code: Some(0),
                    timed_out: false,
                    duration: started.elapsed(),
                    success: true,
                };
            }

            last = outcome;
            if attempt < max_attempts {
                warn!(
                    "attempt {}/{} failed for {} (exit {:?}); retrying in {}s",
                    attempt,
                    max_attempts,
                    spec.description,
                    last.exit_code,
                    delay.as_secs()
                );
                thread::sleep(delay);
            }
        }

        error!(
            "command failed after {} attempt(s): {}",
            max_attempts, spec.description
        );
        CommandResult {
            description: spec.description.clone(),
            attempts_used: max_attempts,
            exit_code: last.exit_code,
            timed_out: last.timed_out,
            duration: started.elapsed(),
            success: false,
        }
    }

    /// Spawn one attempt and see it through to exit or kill.
    fn attempt(&self, prepared: &PreparedInvocation) -> AttemptOutcome {
        let mut command = Command::new(&prepared.program);
        command.args(&prepared.args);
        for (key, value) in &prepared.envs {
            command.env(key, value);
        }
        match prepared.mode {
            OutputMode::Inherit => {
                command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            OutputMode::Stream => {
                // A piped parent stdin flows through to the child so
                // `yes | rem exec ...` keeps working; a terminal does not.
                let stdin = if std::io::stdin().is_terminal() {
                    Stdio::null()
                } else {
                    Stdio::inherit()
                };
                command
                    .stdin(stdin)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            OutputMode::Capture => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AttemptOutcome {
                    spawn_error: Some(e.to_string()),
                    ..AttemptOutcome::default()
                }
            }
        };

        let stdout_reader = child.stdout.take().map(|pipe| {
            let sink = match prepared.mode {
                OutputMode::Capture => ReaderSink::Capture,
                _ => ReaderSink::EchoStdout,
            };
            spawn_reader(pipe, sink)
        });
        let stderr_reader = child.stderr.take().map(|pipe| {
            let sink = match prepared.mode {
                OutputMode::Capture => ReaderSink::Capture,
                _ => ReaderSink::EchoStderr,
            };
            spawn_reader(pipe, sink)
        });

        let deadline = Instant::now() + prepared.timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        timed_out = true;
                        kill_with_grace(&mut child);
                        break child.wait().ok();
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    break None;
                }
            }
        };

        // A grandchild that inherited the pipes keeps them open past the
        // child's own exit; give the readers a bounded window to hit EOF.
        let drain_deadline = Instant::now() + READER_GRACE;
        let stdout = stdout_reader.and_then(|h| h.finish(drain_deadline));
        let stderr = stderr_reader.and_then(|h| h.finish(drain_deadline));

        let exit_code = status.and_then(|s| s.code());
        if let Some(status) = status {
            if exit_code.is_none() {
                use std::os::unix::process::ExitStatusExt;
                debug!(signal = ?status.signal(), "child killed by signal");
            }
        }
        trace!(exit_code = ?exit_code, timed_out, "attempt finished");

        AttemptOutcome {
            exit_code,
            timed_out,
            stdout,
            stderr,
            spawn_error: None,
        }
    }
}

/// Kill a child with SIGTERM, escalating to SIGKILL after a grace period.
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    // SAFETY: plain signal send to a pid we own.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(SIGTERM_GRACE);

    match child.try_wait() {
        Ok(Some(_)) => {
            trace!(pid, "process exited after SIGTERM");
        }
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
            let _ = child.wait();
        }
        Err(e) => {
            error!(pid, error = %e, "failed to check process status");
        }
    }
}

enum ReaderSink {
    EchoStdout,
    EchoStderr,
    Capture,
}

/// A running reader thread plus the means to collect what it saw without
/// joining it unconditionally.
struct ReaderHandle {
    finished: mpsc::Receiver<()>,
    captured: Option<Arc<Mutex<String>>>,
}

impl ReaderHandle {
    /// Wait for the pipe to reach EOF, up to `deadline`. A pipe still open
    /// by then is held by something the child left behind; the reader is
    /// abandoned so the attempt's wall time stays bounded.
    fn finish(self, deadline: Instant) -> Option<String> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.finished.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("output pipe held open past child exit; abandoning reader");
            }
        }
        self.captured.map(|buffer| match buffer.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R, sink: ReaderSink) -> ReaderHandle {
    let (done_tx, done_rx) = mpsc::channel();
    let captured =
        matches!(sink, ReaderSink::Capture).then(|| Arc::new(Mutex::new(String::new())));
    let buffer = captured.clone();

    thread::spawn(move || {
        match sink {
            ReaderSink::EchoStdout => echo_lines(pipe, false),
            ReaderSink::EchoStderr => echo_lines(pipe, true),
            ReaderSink::Capture => {
                if let Some(buffer) = buffer {
                    capture_capped(pipe, &buffer);
                }
            }
        }
        let _ = done_tx.send(());
    });

    ReaderHandle {
        finished: done_rx,
        captured,
    }
}

/// Mirror child output to the console line by line, and into the durable
/// log at debug level.
fn echo_lines<R: Read>(pipe: R, to_stderr: bool) {
    let reader = BufReader::new(pipe);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if to_stderr {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
                debug!(target: "rem::cmd", "{}", line);
            }
            Err(_) => break,
        }
    }
}

/// Append pipe output to the shared buffer as it arrives, up to the cap, so
/// a partially read capture survives an abandoned reader.
fn capture_capped<R: Read>(pipe: R, buffer: &Mutex<String>) {
    let mut reader = pipe.take(CAPTURE_LIMIT);
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                match buffer.lock() {
                    Ok(mut guard) => guard.push_str(&text),
                    Err(poisoned) => poisoned.into_inner().push_str(&text),
                }
            }
        }
    }
}

// Duration as integer milliseconds in JSON.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunnerSettings;
    use rem_common::SystemPaths;

    fn test_runner() -> CommandRunner {
        let settings = RunnerSettings {
            retry_delay: Duration::from_millis(10),
            ..RunnerSettings::default()
        };
        CommandRunner::new(Arc::new(EngineContext::new(
            SystemPaths::default(),
            settings,
        )))
    }

    #[test]
    fn test_run_echo_succeeds() {
        let runner = test_runner();
        let spec = CommandSpec::shell("say hello", "echo hello").unwrap();
        let result = runner.run(&spec);

        assert!(result.success, "echo failed: {:?}", result);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
    }

    #[test]
    fn test_retry_bound_is_respected() {
        let runner = test_runner();
        let spec = CommandSpec::shell("always fails", "false").unwrap();
        let result = runner.run(&spec);

        assert!(!result.success);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_timeout_kills_the_child() {
        let runner = test_runner();
        let spec = CommandSpec::shell("long sleep", "sleep 30")
            .unwrap()
            .with_timeout(Duration::from_millis(100))
            .with_retries(1);

        let started = Instant::now();
        let result = runner.run(&spec);

        assert!(!result.success);
        assert!(result.timed_out, "expected timeout, got {:?}", result);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "kill took too long: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_grandchild_holding_pipe_does_not_stall_success() {
        // The backgrounded sleep inherits the output pipes and outlives the
        // shell; the run must still return promptly.
        let runner = test_runner();
        let spec = CommandSpec::from_argv(
            "fast exit, slow grandchild",
            vec!["sh".into(), "-c".into(), "sleep 20 & exit 0".into()],
        )
        .unwrap()
        .with_retries(1);

        let started = Instant::now();
        let result = runner.run(&spec);

        assert!(result.success, "{:?}", result);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "run stalled on an inherited pipe: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_timeout_with_grandchild_holding_pipe() {
        let runner = test_runner();
        let spec = CommandSpec::from_argv(
            "timeout, grandchild keeps the pipe",
            vec!["sh".into(), "-c".into(), "sleep 20 & sleep 30".into()],
        )
        .unwrap()
        .with_timeout(Duration::from_millis(200))
        .with_retries(1);

        let started = Instant::now();
        let result = runner.run(&spec);

        assert!(result.timed_out, "{:?}", result);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "timeout enforcement stalled on an inherited pipe: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_flaky_command_succeeds_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let script = format!(
            r#"n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; [ "$n" -ge 3 ]"#,
            c = counter.display()
        );

        let runner = test_runner();
        let spec = CommandSpec::from_argv(
            "flaky step",
            vec!["sh".into(), "-c".into(), script],
        )
        .unwrap();
        let result = runner.run(&spec);

        assert!(result.success, "flaky command never recovered: {:?}", result);
        assert_eq!(result.attempts_used, 3);
    }

    #[test]
    fn test_compound_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let witness = dir.path().join("second-ran");
        let line = format!("false && touch {}", witness.display());

        let runner = test_runner();
        let spec = CommandSpec::shell("two steps", &line)
            .unwrap()
            .with_retries(1);
        let result = runner.run(&spec);

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert!(!witness.exists(), "second part ran despite first failing");
    }

    #[test]
    fn test_compound_runs_all_parts_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let witness = dir.path().join("second-ran");
        let line = format!("true && touch {}", witness.display());

        let runner = test_runner();
        let spec = CommandSpec::shell("two steps", &line).unwrap();
        let result = runner.run(&spec);

        assert!(result.success);
        assert!(witness.exists());
        assert_eq!(result.attempts_used, 2); // one per part
    }

    #[test]
    fn test_run_checked_maps_exhaustion() {
        let runner = test_runner();
        let spec = CommandSpec::shell("always fails", "false")
            .unwrap()
            .with_retries(2);

        match runner.run_checked(&spec) {
            Err(Error::CommandExhausted {
                attempts,
                exit_code,
                ..
            }) => {
                assert_eq!(attempts, 2);
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("expected CommandExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure_counts_as_attempt() {
        let runner = test_runner();
        let spec = CommandSpec::shell("missing binary", "/nonexistent/definitely-not-here")
            .unwrap()
            .with_retries(2);
        let result = runner.run(&spec);

        assert!(!result.success);
        assert_eq!(result.attempts_used, 2);
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn test_capture_reads_stdout_and_stderr() {
        let runner = test_runner();
        let out = runner
            .capture(
                "probe",
                &["sh", "-c", "echo out; echo err >&2"],
                Duration::from_secs(5),
            )
            .unwrap();

        assert!(out.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_capture_spawn_failure_is_an_error() {
        let runner = test_runner();
        let result = runner.capture(
            "probe",
            &["/nonexistent/definitely-not-here"],
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
    }

    #[test]
    fn test_result_serializes_with_millis() {
        let result = CommandResult {
            description: "x".into(),
            attempts_used: 1,
            exit_code: Some(0),
            timed_out: false,
            duration: Duration::from_millis(1234),
            success: true,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"duration\":1234"));
    }
}
