//! One handler per `rem` operation.
//!
//! Handlers never panic and never call `process::exit` themselves: each one
//! returns an [`ExitCode`] and the binary's `main` decides what to do with
//! it. The interactive menu calls the same handlers, so a step behaves the
//! same whether it was picked from the menu or invoked as a subcommand.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use tracing::{error, info, warn};

use rem_common::{format_error_human, privilege, Error, SystemPaths};
use rem_engine::backup::{BackupManager, SessionInfo};
use rem_engine::detect::{self, AuthBackend};
use rem_engine::runner::pkg::disk_usage;
use rem_engine::template;
use rem_engine::{CommandRunner, CommandSpec};

use crate::exit_codes::ExitCode;
use crate::settings::{OutputFormat, Settings};

/// Tools the install and backup flows shell out to by name.
const REQUIRED_TOOLS: &[&str] = &["apt-get", "dpkg", "systemctl", "openssl"];

/// Default number of backup sessions `prune` keeps.
pub const DEFAULT_RETAIN: usize = 5;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Template file to render
    #[arg(long, value_name = "FILE")]
    pub template: PathBuf,

    /// Placeholder binding, repeatable (NAME=VALUE)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Write the result here instead of stdout
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// File mode for the output, octal (e.g. 600 for secrets)
    #[arg(long, value_name = "OCTAL")]
    pub mode: Option<String>,

    /// Treat the template as a systemd unit: resolve {{NAME}} placeholders
    /// from the environment instead of --set bindings
    #[arg(long)]
    pub unit_file: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Description used in log lines about this command
    #[arg(long, value_name = "TEXT")]
    pub desc: Option<String>,

    /// The command to run
    #[arg(trailing_var_arg = true, required = true, value_name = "CMDLINE")]
    pub cmdline: Vec<String>,
}

/// Print a failure the way the operator and the log both understand it,
/// then translate it to an exit code.
fn report_error(err: &Error) -> ExitCode {
    let use_color = std::io::stderr().is_terminal();
    eprintln!("{}", format_error_human(err, use_color));
    error!("{err}");
    ExitCode::from(err)
}

/// Mutating operations on the live system need root; a staged sysroot does
/// not.
fn ensure_privileged(settings: &Settings, operation: &str) -> Result<(), Error> {
    if settings.paths.is_real_root() {
        privilege::require_root(operation)
    } else {
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("could not serialize output: {e}"),
    }
}

// ============================================================================
// check
// ============================================================================

#[derive(Debug, Serialize)]
struct ToolStatus {
    name: String,
    found: bool,
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiskStatus {
    mount: String,
    used_percent: Option<u8>,
    tight: bool,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    running_as_root: bool,
    sysroot: String,
    tools: Vec<ToolStatus>,
    disk: Vec<DiskStatus>,
    backup_dir_writable: bool,
    log_dir_writable: bool,
    auth_backend: AuthBackend,
    ok: bool,
}

/// Locate an executable by scanning PATH, the way the shell would.
fn tool_on_path(name: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if let Ok(meta) = std::fs::metadata(&candidate) {
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

/// True when the directory exists (or can be created) and accepts writes.
fn dir_writable(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".rem-write-check");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn disk_report(paths: &SystemPaths) -> Vec<DiskStatus> {
    ["/", "/var"]
        .iter()
        .map(|mount| {
            let used = disk_usage(&paths.resolve(mount));
            DiskStatus {
                mount: mount.to_string(),
                used_percent: used.map(|u| (u * 100.0).round() as u8),
                tight: used.map(|u| u >= 0.95).unwrap_or(false),
            }
        })
        .collect()
}

/// Doctor-style environment report. Reports problems instead of refusing;
/// the exit code says whether anything needs attention.
pub fn check(settings: &Settings) -> ExitCode {
    let ctx = settings.engine_context();
    let runner = CommandRunner::new(ctx);

    let running_as_root = rem_common::euid_is_root();
    let tools: Vec<ToolStatus> = REQUIRED_TOOLS
        .iter()
        .map(|name| {
            let path = tool_on_path(name);
            ToolStatus {
                name: name.to_string(),
                found: path.is_some(),
                path: path.map(|p| p.display().to_string()),
            }
        })
        .collect();

    let disk = disk_report(&settings.paths);
    let backup_dir_writable = dir_writable(&settings.paths.backup_base());
    let log_dir_writable = dir_writable(&settings.paths.log_dir());
    let auth_backend = detect::detect(&runner, &settings.paths);

    let root_ok = running_as_root || !settings.paths.is_real_root();
    let ok = root_ok
        && tools.iter().all(|t| t.found)
        && backup_dir_writable
        && log_dir_writable
        && disk.iter().all(|d| !d.tight);

    let report = CheckReport {
        running_as_root,
        sysroot: settings.paths.sysroot().display().to_string(),
        tools,
        disk,
        backup_dir_writable,
        log_dir_writable,
        auth_backend,
        ok,
    };

    match settings.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Human => {
            let mark = |ok: bool| if ok { "✓" } else { "✗" };
            println!("# System check");
            println!("{} running as root", mark(report.running_as_root));
            println!("  sysroot: {}", report.sysroot);
            for tool in &report.tools {
                match &tool.path {
                    Some(path) => println!("{} {} ({path})", mark(true), tool.name),
                    None => println!("{} {} not found on PATH", mark(false), tool.name),
                }
            }
            for d in &report.disk {
                match d.used_percent {
                    Some(pct) => println!("{} {} is {pct}% full", mark(!d.tight), d.mount),
                    None => println!("? {} usage unknown", d.mount),
                }
            }
            println!(
                "{} backup directory writable ({})",
                mark(report.backup_dir_writable),
                settings.paths.backup_base().display()
            );
            println!(
                "{} log directory writable ({})",
                mark(report.log_dir_writable),
                settings.paths.log_dir().display()
            );
            println!("  auth backend: {}", report.auth_backend);
        }
    }

    if report.ok {
        ExitCode::Success
    } else {
        ExitCode::CompletedWithWarnings
    }
}

// ============================================================================
// backup
// ============================================================================

pub fn backup_create(settings: &Settings) -> ExitCode {
    if let Err(err) = ensure_privileged(settings, "backup create") {
        return report_error(&err);
    }

    let manager = BackupManager::new(settings.engine_context());
    match manager.snapshot() {
        Ok(report) => {
            match settings.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Human => println!(
                    "backup {}: {} items captured, {} absent, {} failed",
                    report.session.display(),
                    report.copied,
                    report.skipped,
                    report.failed
                ),
            }
            if report.failed > 0 {
                ExitCode::CompletedWithWarnings
            } else {
                ExitCode::Success
            }
        }
        Err(err) => report_error(&err),
    }
}

pub fn backup_list(settings: &Settings) -> ExitCode {
    let manager = BackupManager::new(settings.engine_context());
    let sessions = match manager.sessions() {
        Ok(sessions) => sessions,
        Err(err) => return report_error(&err),
    };

    match settings.format {
        OutputFormat::Json => {
            let rows: Vec<_> = sessions
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.id,
                        "day": s.day,
                        "path": s.path.display().to_string(),
                        "created_at": s.created_at,
                        "items": s.item_count,
                    })
                })
                .collect();
            print_json(&rows);
        }
        OutputFormat::Human => {
            if sessions.is_empty() {
                println!("no backup sessions under {}", manager.base_dir().display());
            } else {
                println!("{:<28} {:<12} {:>5}  CREATED", "SESSION", "DAY", "ITEMS");
                for s in &sessions {
                    println!(
                        "{:<28} {:<12} {:>5}  {}",
                        s.id,
                        s.day,
                        s.item_count
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "?".into()),
                        s.created_at.as_deref().unwrap_or("?")
                    );
                }
            }
        }
    }
    ExitCode::Success
}

/// Ask the operator before replacing live configuration. Non-interactive
/// runs must pass `--yes`; a closed stdin never silently confirms.
fn confirm_restore(session: &SessionInfo, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    if !std::io::stdin().is_terminal() {
        warn!("refusing restore without a terminal; pass --yes to confirm");
        return false;
    }

    print!(
        "Restore backup {} ({})? This overwrites live configuration. [y/N] ",
        session.id, session.day
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn backup_restore(settings: &Settings) -> ExitCode {
    if let Err(err) = ensure_privileged(settings, "backup restore") {
        return report_error(&err);
    }

    let ctx = settings.engine_context();
    let runner = CommandRunner::new(ctx.clone());
    let manager = BackupManager::new(ctx);
    let assume_yes = settings.assume_yes;

    match manager.restore_latest(&runner, &mut |session| confirm_restore(session, assume_yes)) {
        Ok(Some(report)) => {
            match settings.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Human => {
                    println!(
                        "restored {} item(s) from {} ({} failed)",
                        report.restored,
                        report.session.display(),
                        report.failed
                    );
                    if report.services_skipped {
                        println!("service restarts skipped (alternate sysroot)");
                    } else {
                        for unit in &report.services_restarted {
                            println!("restarted {unit}");
                        }
                        for unit in &report.services_failed {
                            println!("restart FAILED for {unit}");
                        }
                    }
                }
            }
            if report.failed > 0 || !report.services_failed.is_empty() {
                ExitCode::CompletedWithWarnings
            } else {
                ExitCode::Success
            }
        }
        Ok(None) => {
            println!("restore aborted");
            ExitCode::Success
        }
        Err(err) => report_error(&err),
    }
}

pub fn backup_verify(settings: &Settings) -> ExitCode {
    let manager = BackupManager::new(settings.engine_context());
    match manager.verify_latest() {
        Ok(report) => {
            match settings.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Human => {
                    println!(
                        "verified {} file(s) in {}",
                        report.checked,
                        report.session.display()
                    );
                    for name in &report.missing {
                        println!("MISSING   {name}");
                    }
                    for name in &report.mismatched {
                        println!("MISMATCH  {name}");
                    }
                }
            }
            if report.ok() {
                ExitCode::Success
            } else {
                ExitCode::CompletedWithWarnings
            }
        }
        Err(err) => report_error(&err),
    }
}

pub fn backup_prune(settings: &Settings, retain: usize) -> ExitCode {
    if let Err(err) = ensure_privileged(settings, "backup prune") {
        return report_error(&err);
    }

    let manager = BackupManager::new(settings.engine_context());
    match manager.prune(retain) {
        Ok(removed) => {
            println!(
                "pruned {} session(s), keeping the newest {retain}",
                removed.len()
            );
            ExitCode::Success
        }
        Err(err) => report_error(&err),
    }
}

// ============================================================================
// render
// ============================================================================

fn parse_bindings(pairs: &[String]) -> Result<Vec<(String, String)>, Error> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .ok_or_else(|| Error::InvalidSetting {
                    name: "--set".into(),
                    value: pair.clone(),
                    reason: "expected NAME=VALUE".into(),
                })
        })
        .collect()
}

fn parse_mode(mode: &str) -> Result<u32, Error> {
    u32::from_str_radix(mode, 8)
        .map_err(|_| Error::InvalidSetting {
            name: "--mode".into(),
            value: mode.to_string(),
            reason: "expected an octal file mode such as 600".into(),
        })
        .and_then(|m| {
            if m > 0o7777 {
                Err(Error::InvalidSetting {
                    name: "--mode".into(),
                    value: mode.to_string(),
                    reason: "mode out of range".into(),
                })
            } else {
                Ok(m)
            }
        })
}

pub fn render(_settings: &Settings, args: &RenderArgs) -> ExitCode {
    let rendered = if args.unit_file {
        if !args.set.is_empty() {
            return report_error(&Error::InvalidSetting {
                name: "--set".into(),
                value: args.set.join(","),
                reason: "unit-file templates resolve placeholders from the environment".into(),
            });
        }
        match template::render_unit_from_env(&args.template) {
            Ok(unit) => unit.text,
            Err(err) => return report_error(&err),
        }
    } else {
        let bindings = match parse_bindings(&args.set) {
            Ok(bindings) => bindings,
            Err(err) => return report_error(&err),
        };
        match template::render(&args.template, &bindings) {
            Ok(text) => text,
            Err(err) => return report_error(&err),
        }
    };

    match &args.output {
        Some(output) => {
            let mode = match args.mode.as_deref().map(parse_mode).transpose() {
                Ok(mode) => mode,
                Err(err) => return report_error(&err),
            };
            match template::write_rendered(output, &rendered, mode) {
                Ok(()) => {
                    info!("rendered {} to {}", args.template.display(), output.display());
                    ExitCode::Success
                }
                Err(err) => report_error(&err),
            }
        }
        None => {
            print!("{rendered}");
            ExitCode::Success
        }
    }
}

// ============================================================================
// exec
// ============================================================================

pub fn exec(settings: &Settings, args: &ExecArgs) -> ExitCode {
    let description = args
        .desc
        .clone()
        .unwrap_or_else(|| args.cmdline.join(" "));

    // A single argument is a full command line (quoting and `&&` honored);
    // multiple arguments are taken as literal argv tokens.
    let spec = if args.cmdline.len() == 1 {
        CommandSpec::shell(description, &args.cmdline[0])
    } else {
        CommandSpec::from_argv(description, args.cmdline.clone())
    };
    let spec = match spec {
        Ok(spec) => spec,
        Err(err) => return report_error(&err),
    };

    let runner = CommandRunner::new(settings.engine_context());
    let result = runner.run(&spec);

    if settings.format == OutputFormat::Json {
        print_json(&result);
    }

    if result.success {
        ExitCode::Success
    } else if result.timed_out {
        ExitCode::TimeoutError
    } else {
        ExitCode::OperationFailed
    }
}

// ============================================================================
// version
// ============================================================================

pub fn version() -> ExitCode {
    println!("rem {}", env!("CARGO_PKG_VERSION"));
    ExitCode::Success
}
