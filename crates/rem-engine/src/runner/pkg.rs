//! Package-manager preparation.
//!
//! apt and dpkg are the one class of command this engine cannot treat as a
//! black box: left alone they stop for configuration prompts, trip over the
//! remains of interrupted runs, and fill minimal hosts with documentation.
//! Before the first attempt of a package command the runner:
//!
//! 1. writes the dpkg nodoc drop-in (once, idempotently)
//! 2. runs a one-time health pre-check: sweeps stale lock files, finishes
//!    interrupted configuration (`dpkg --configure -a`), repairs broken
//!    dependencies (`apt-get -f install`), and warns when the disk is
//!    nearly full
//! 3. merges the non-interactive environment and safety flags into the
//!    invocation, never overriding flags the caller supplied

use crate::context::EngineContext;
use crate::runner::lock::LockInspector;
use crate::runner::spec::{CommandSpec, PkgInvocation, PkgTool};
use crate::runner::{CommandRunner, OutputMode, PreparedInvocation};
use rem_common::SystemPaths;
use std::ffi::CString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fraction of a filesystem in use that triggers a warning.
const DISK_HIGH_WATER: f64 = 0.95;

/// Timeout for each health pre-check step.
const PRECHECK_TIMEOUT: Duration = Duration::from_secs(600);

/// dpkg drop-in that keeps documentation off minimal hosts.
pub(crate) const NODOC_CONTENT: &str = "\
path-exclude=/usr/share/doc/*
path-include=/usr/share/doc/*/copyright
path-exclude=/usr/share/man/*
path-exclude=/usr/share/groff/*
path-exclude=/usr/share/info/*
";

/// apt verbs that prompt for confirmation without `-y`.
const PROMPTING_VERBS: &[&str] = &[
    "install",
    "reinstall",
    "remove",
    "purge",
    "upgrade",
    "dist-upgrade",
    "full-upgrade",
    "dselect-upgrade",
    "autoremove",
];

/// dpkg verbs that may touch conffiles.
const DPKG_CONF_VERBS: &[&str] = &["configure", "install", "i", "unpack"];

impl CommandRunner {
    /// Resolve a package invocation into something safe to run unattended.
    pub(crate) fn prepare_pkg(
        &self,
        inv: &PkgInvocation,
        spec: &CommandSpec,
    ) -> PreparedInvocation {
        let ctx = self.context().clone();
        let interactive = spec.interactive || ctx.runner.interactive;

        if let Err(e) = ensure_nodoc_config(&ctx) {
            warn!("could not write dpkg nodoc policy: {e}");
        }

        if ctx.mark_pkg_health_done() {
            self.pkg_health_check(interactive);
        }

        let mut args = inv.args.clone();
        args.extend(
            inject_safety_flags(inv, interactive)
                .into_iter()
                .map(String::from),
        );

        let timeout = spec
            .timeout
            .or_else(|| verb_timeout(inv.tool, inv.verb.as_deref()))
            .unwrap_or(ctx.runner.timeout);

        let envs = if interactive {
            Vec::new()
        } else {
            noninteractive_env()
        };

        debug!(
            tool = inv.tool.program(),
            verb = ?inv.verb,
            timeout_s = timeout.as_secs(),
            "prepared package command"
        );

        PreparedInvocation {
            program: inv.tool.program().to_string(),
            args,
            envs,
            timeout,
            mode: if interactive {
                OutputMode::Inherit
            } else {
                OutputMode::Stream
            },
        }
    }

    /// One-time repair pass before the first package command of a run.
    ///
    /// The lock sweep and disk check resolve against the configured sysroot;
    /// the dpkg/apt repair commands can only act on the live host and are
    /// skipped when a staged tree is in play.
    fn pkg_health_check(&self, interactive: bool) -> PrecheckOutcome {
        info!("package system pre-check");

        let locks_removed =
            sweep_stale_locks(self.inspector(), &self.context().paths.pkg_lock_files());
        if locks_removed > 0 {
            info!("removed {locks_removed} stale package lock file(s)");
        }

        warn_if_disk_tight(&self.context().paths);

        if !self.context().paths.is_real_root() {
            debug!("alternate sysroot, skipping dpkg/apt repair steps");
            return PrecheckOutcome {
                locks_removed,
                repairs_attempted: false,
            };
        }

        let envs = if interactive {
            Vec::new()
        } else {
            noninteractive_env()
        };
        self.precheck_step(
            "finish interrupted dpkg configuration",
            &["dpkg", "--configure", "-a"],
            &envs,
        );
        self.precheck_step(
            "repair broken dependencies",
            &["apt-get", "-y", "-f", "install"],
            &envs,
        );

        PrecheckOutcome {
            locks_removed,
            repairs_attempted: true,
        }
    }

    /// Run one pre-check command directly, without recursing into `run`.
    /// Failure here is advisory; the real command still gets its chance.
    fn precheck_step(&self, description: &str, argv: &[&str], envs: &[(String, String)]) {
        debug!("pre-check step: {description}");
        let prepared = PreparedInvocation {
            program: argv[0].to_string(),
            args: argv[1..].iter().map(|s| s.to_string()).collect(),
            envs: envs.to_vec(),
            timeout: PRECHECK_TIMEOUT,
            mode: OutputMode::Stream,
        };
        let outcome = self.attempt(&prepared);
        if let Some(reason) = outcome.spawn_error {
            debug!("pre-check step unavailable ({description}): {reason}");
        } else if outcome.exit_code != Some(0) {
            warn!(
                "pre-check step failed ({description}; exit {:?})",
                outcome.exit_code
            );
        }
    }
}

/// What the one-time pre-check actually did.
pub(crate) struct PrecheckOutcome {
    pub locks_removed: usize,
    pub repairs_attempted: bool,
}

/// Environment that keeps Debian tooling from prompting or pausing.
pub(crate) fn noninteractive_env() -> Vec<(String, String)> {
    [
        ("DEBIAN_FRONTEND", "noninteractive"),
        ("DEBCONF_NONINTERACTIVE_SEEN", "true"),
        ("NEEDRESTART_MODE", "a"),
        ("APT_LISTCHANGES_FRONTEND", "none"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Flags appended to a package invocation, skipping any the caller already
/// decided. Caller flags always win.
pub(crate) fn inject_safety_flags(inv: &PkgInvocation, interactive: bool) -> Vec<&'static str> {
    let mut extra = Vec::new();
    let args = &inv.args;
    let verb = inv.verb.as_deref();

    match inv.tool {
        PkgTool::Dpkg => {
            let conf_verb = verb.map(|v| DPKG_CONF_VERBS.contains(&v)).unwrap_or(false);
            if !interactive && conf_verb && !args.iter().any(|a| a.starts_with("--force-conf")) {
                extra.push("--force-confdef");
                extra.push("--force-confold");
            }
        }
        PkgTool::Apt | PkgTool::AptGet => {
            let prompting = verb.map(|v| PROMPTING_VERBS.contains(&v)).unwrap_or(false);

            if !interactive && prompting {
                if !has_flag(args, &["-y", "--yes", "--assume-yes", "--assume-no"]) {
                    extra.push("-y");
                }
                if !args.iter().any(|a| a.contains("Dpkg::Options")) {
                    extra.push("-o");
                    extra.push("Dpkg::Options::=--force-confdef");
                    extra.push("-o");
                    extra.push("Dpkg::Options::=--force-confold");
                }
                if !args.iter().any(|a| a.contains("AllowUnauthenticated")) {
                    extra.push("-o");
                    extra.push("APT::Get::AllowUnauthenticated=false");
                }
            }

            if matches!(verb, Some("install") | Some("reinstall"))
                && !has_flag(args, &["--install-recommends", "--no-install-recommends"])
            {
                extra.push("--no-install-recommends");
            }

            if inv.tool == PkgTool::Apt
                && !interactive
                && !args.iter().any(|a| a.contains("Dpkg::Progress-Fancy"))
            {
                extra.push("-o");
                extra.push("Dpkg::Progress-Fancy=0");
            }
        }
    }

    extra
}

fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

/// Per-verb timeouts; package installs legitimately run for many minutes.
pub(crate) fn verb_timeout(tool: PkgTool, verb: Option<&str>) -> Option<Duration> {
    if tool == PkgTool::Dpkg {
        return Some(Duration::from_secs(600));
    }
    match verb? {
        "install" | "reinstall" | "upgrade" | "dist-upgrade" | "full-upgrade"
        | "dselect-upgrade" => Some(Duration::from_secs(1800)),
        "remove" | "purge" | "autoremove" => Some(Duration::from_secs(900)),
        "update" => Some(Duration::from_secs(600)),
        _ => None,
    }
}

/// Write the dpkg nodoc drop-in if this process hasn't already ensured it.
/// Returns true when the file was freshly written.
pub fn ensure_nodoc_config(ctx: &EngineContext) -> io::Result<bool> {
    if !ctx.mark_nodoc_written() {
        return Ok(false);
    }

    let path = ctx.paths.dpkg_nodoc_file();
    if path.exists() && fs::read_to_string(&path)? == NODOC_CONTENT {
        debug!("dpkg nodoc policy already present: {}", path.display());
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, NODOC_CONTENT)?;
    info!("wrote dpkg nodoc policy: {}", path.display());
    Ok(true)
}

/// Remove lock files nothing is holding; leave held ones alone.
pub(crate) fn sweep_stale_locks(inspector: &dyn LockInspector, lock_files: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in lock_files {
        if !path.exists() {
            continue;
        }
        match inspector.is_held(path) {
            Ok(true) => {
                info!(
                    "package lock {} is held by a running process; leaving it",
                    path.display()
                );
            }
            Ok(false) => {
                // A process can still take the lock between this probe and
                // the unlink; probe again right before removing to shrink
                // the window.
                match inspector.is_held(path) {
                    Ok(false) => match fs::remove_file(path) {
                        Ok(()) => {
                            warn!("removed stale package lock: {}", path.display());
                            removed += 1;
                        }
                        Err(e) => {
                            warn!("could not remove stale lock {}: {e}", path.display());
                        }
                    },
                    Ok(true) => {
                        info!(
                            "package lock {} became held; leaving it",
                            path.display()
                        );
                    }
                    Err(e) => debug!("lock probe failed for {}: {e}", path.display()),
                }
            }
            Err(e) => debug!("lock probe failed for {}: {e}", path.display()),
        }
    }
    removed
}

fn warn_if_disk_tight(paths: &SystemPaths) {
    for mount in ["/", "/var"] {
        let path = paths.resolve(mount);
        if let Some(used) = disk_usage(&path) {
            if used >= DISK_HIGH_WATER {
                warn!(
                    "filesystem at {} is {:.0}% full; package operations may fail",
                    path.display(),
                    used * 100.0
                );
            }
        }
    }
}

/// Fraction of the filesystem holding `path` that is in use.
pub fn disk_usage(path: &Path) -> Option<f64> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: cpath outlives the call; vfs is a plain output struct.
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut vfs) };
    if rc != 0 || vfs.f_blocks == 0 {
        return None;
    }
    Some(1.0 - vfs.f_bavail as f64 / vfs.f_blocks as f64)
}
