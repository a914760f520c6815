//! Interactive orchestration menu.
//!
//! A deliberately plain stdin loop: one human operator, one sequential menu,
//! no TUI. Every choice dispatches to the same handler the equivalent
//! subcommand uses, so the menu adds sequencing and prompting, never
//! behavior. A failed step is reported and the menu comes back; it never
//! takes the whole process down.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use tracing::info;

use crate::commands::{self, RenderArgs, DEFAULT_RETAIN};
use crate::exit_codes::ExitCode;
use crate::settings::Settings;

const MENU: &str = "\
R Environment Manager
---------------------
 1) System check
 2) Create backup
 3) Restore latest backup
 4) List backup sessions
 5) Verify latest backup
 6) Prune old backups
 7) Render a template
 q) Quit
";

/// Read one line from stdin; `None` on EOF.
fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    let _ = io::stdout().flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}

/// Prompt for a render invocation: template path, bindings until an empty
/// line, optional output path.
fn render_interactively(settings: &Settings) -> ExitCode {
    let Some(template) = read_line("Template path: ") else {
        return ExitCode::Success;
    };
    if template.is_empty() {
        println!("no template given");
        return ExitCode::ArgsError;
    }

    let mut set = Vec::new();
    loop {
        match read_line("Binding NAME=VALUE (empty line to finish): ") {
            Some(binding) if !binding.is_empty() => set.push(binding),
            _ => break,
        }
    }

    let output = read_line("Output path (empty for stdout): ")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let args = RenderArgs {
        template: PathBuf::from(template),
        set,
        output,
        mode: None,
        unit_file: false,
    };
    commands::render(settings, &args)
}

/// Run the menu until the operator quits or stdin closes.
///
/// Mutating choices (restore) go through their own confirmation; standalone
/// checks and listings never block the next iteration regardless of outcome.
pub fn run(settings: &Settings) -> ExitCode {
    if !io::stdin().is_terminal() {
        info!("stdin is not a terminal; menu will exit at EOF");
    }

    loop {
        println!();
        println!("{MENU}");
        let Some(choice) = read_line("Choice: ") else {
            return ExitCode::Success;
        };

        let outcome = match choice.as_str() {
            "1" => commands::check(settings),
            "2" => commands::backup_create(settings),
            "3" => commands::backup_restore(settings),
            "4" => commands::backup_list(settings),
            "5" => commands::backup_verify(settings),
            "6" => {
                let retain = read_line(&format!("Sessions to keep [{DEFAULT_RETAIN}]: "))
                    .and_then(|s| if s.is_empty() { None } else { s.parse().ok() })
                    .unwrap_or(DEFAULT_RETAIN);
                commands::backup_prune(settings, retain)
            }
            "7" => render_interactively(settings),
            "q" | "Q" | "quit" | "exit" => return ExitCode::Success,
            "" => continue,
            other => {
                println!("unknown choice: {other}");
                continue;
            }
        };

        if !outcome.is_success() {
            println!("step finished with {outcome}");
        }
    }
}
