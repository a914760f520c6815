//! R Environment Manager — configuration reconciliation for RStudio hosts.
//!
//! The `rem` binary drives the engine in `rem-engine`: bounded-retry command
//! execution, template rendering, and configuration backup/restore for an
//! RStudio Server / Nginx / domain-auth machine. Run on a terminal with no
//! subcommand it presents the interactive menu; every menu entry is also a
//! subcommand for scripted use.

use std::io::IsTerminal;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

use rem_core::commands::{self, ExecArgs, RenderArgs, DEFAULT_RETAIN};
use rem_core::logging::{self, LogConfig, LogFormat, LogLevel};
use rem_core::settings::{GlobalOpts, Settings};
use rem_core::ExitCode;

/// R Environment Manager - provision and protect an RStudio Server host
#[derive(Parser)]
#[command(name = "rem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive orchestration menu (default on a terminal)
    Menu,

    /// Check privileges, tools, disk, and auth-backend detection
    Check,

    /// Configuration backup sessions
    Backup(BackupArgs),

    /// Render a template with placeholder bindings
    Render(RenderArgs),

    /// Run one command through the engine (retries, timeout, apt handling)
    Exec(ExecArgs),

    /// Print version information
    Version,
}

#[derive(clap::Args)]
struct BackupArgs {
    #[command(subcommand)]
    command: BackupCommands,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Snapshot the configuration manifest into a new session
    Create,
    /// List sessions, newest first
    List,
    /// Restore the newest session and restart affected services
    Restore,
    /// Check the newest session against its recorded checksums
    Verify,
    /// Remove sessions beyond the newest N
    Prune {
        /// Sessions to keep
        #[arg(long, default_value_t = DEFAULT_RETAIN)]
        retain: usize,
    },
}

/// Console level from -v/-q; the environment fills in when neither is given.
fn cli_level(global: &GlobalOpts) -> Option<LogLevel> {
    if global.quiet {
        Some(LogLevel::Error)
    } else {
        match global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.global);

    let cli_format = cli
        .global
        .log_format
        .as_deref()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .or(match settings.format {
            rem_core::settings::OutputFormat::Json => Some(LogFormat::Jsonl),
            rem_core::settings::OutputFormat::Human => None,
        });
    let log_config = LogConfig::from_env(cli_level(&cli.global), cli_format);
    logging::init_logging(
        &log_config,
        settings.paths.log_file(),
        settings.main_log.clone(),
    );

    let run_id = logging::generate_run_id();
    info!(run_id = %run_id, "rem {} starting", env!("CARGO_PKG_VERSION"));

    let exit_code = match &cli.command {
        // The menu is the default only on a terminal; a piped stdin with no
        // subcommand is a scripting mistake, not menu input.
        None => {
            if std::io::stdin().is_terminal() {
                rem_core::menu::run(&settings)
            } else {
                let _ = Cli::command().print_help();
                ExitCode::ArgsError
            }
        }
        Some(Commands::Menu) => rem_core::menu::run(&settings),
        Some(Commands::Check) => commands::check(&settings),
        Some(Commands::Backup(args)) => match &args.command {
            BackupCommands::Create => commands::backup_create(&settings),
            BackupCommands::List => commands::backup_list(&settings),
            BackupCommands::Restore => commands::backup_restore(&settings),
            BackupCommands::Verify => commands::backup_verify(&settings),
            BackupCommands::Prune { retain } => commands::backup_prune(&settings, *retain),
        },
        Some(Commands::Render(args)) => commands::render(&settings, args),
        Some(Commands::Exec(args)) => commands::exec(&settings, args),
        Some(Commands::Version) => commands::version(),
    };

    info!(run_id = %run_id, "rem finished with {exit_code}");
    std::process::exit(exit_code.as_i32());
}
