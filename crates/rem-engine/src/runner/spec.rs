//! Command descriptions.
//!
//! A [`CommandSpec`] is classified once, at construction: package-manager
//! invocations (apt, apt-get, dpkg) get their own variant so the runner can
//! prepare them for unattended execution, `&&`-joined lines become a
//! [`CommandKind::Compound`] that short-circuits on failure, and everything
//! else runs as-is. No shell is ever involved at execution time.

use rem_common::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// What a command is, decided when the spec is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// An arbitrary program invocation.
    Generic { argv: Vec<String> },

    /// An apt/apt-get/dpkg invocation, run through package preparation.
    PackageManager(PkgInvocation),

    /// Several commands executed in order, stopping at the first failure.
    Compound { parts: Vec<CommandSpec> },
}

/// A parsed package-manager invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgInvocation {
    pub tool: PkgTool,

    /// The subcommand (`install`, `update`, ...), when one could be found.
    pub verb: Option<String>,

    /// Everything after the program name, verbatim.
    pub args: Vec<String>,
}

/// Package-manager front ends this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgTool {
    Apt,
    AptGet,
    Dpkg,
}

impl PkgTool {
    pub fn program(&self) -> &'static str {
        match self {
            PkgTool::Apt => "apt",
            PkgTool::AptGet => "apt-get",
            PkgTool::Dpkg => "dpkg",
        }
    }

    fn from_program(name: &str) -> Option<Self> {
        match name {
            "apt" => Some(PkgTool::Apt),
            "apt-get" => Some(PkgTool::AptGet),
            "dpkg" => Some(PkgTool::Dpkg),
            _ => None,
        }
    }
}

/// A command to run, plus per-command overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Human-readable label used in every log line about this command.
    pub description: String,

    pub kind: CommandKind,

    /// Override the context-wide timeout for this command.
    pub timeout: Option<Duration>,

    /// Override the context-wide retry count for this command.
    pub retries: Option<u32>,

    /// Connect the command to the terminal (stdin included).
    pub interactive: bool,
}

impl CommandSpec {
    /// Build a spec from an argv-style token list.
    pub fn from_argv(
        description: impl Into<String>,
        argv: Vec<String>,
    ) -> Result<Self> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(Error::EmptyCommand);
        }
        Ok(Self {
            description: description.into(),
            kind: classify(argv),
            timeout: None,
            retries: None,
            interactive: false,
        })
    }

    /// Build a spec from a single command line.
    ///
    /// The line is tokenized with shell-style quoting (single quotes, double
    /// quotes, backslash escapes) and split on bare `&&` separators. Anything
    /// else a shell would interpret (pipes, redirection, substitution) is
    /// passed through as a literal argument.
    pub fn shell(description: impl Into<String>, line: &str) -> Result<Self> {
        let description = description.into();
        let tokens = split_line(line);
        if tokens.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let groups: Vec<&[String]> = tokens.split(|t| t == "&&").collect();
        if groups.iter().any(|g| g.is_empty()) {
            return Err(Error::EmptyCommand);
        }

        if groups.len() == 1 {
            return Self::from_argv(description, groups[0].to_vec());
        }

        let total = groups.len();
        let parts = groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                Self::from_argv(
                    format!("{} [{}/{}]", description, i + 1, total),
                    g.to_vec(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            description,
            kind: CommandKind::Compound { parts },
            timeout: None,
            retries: None,
            interactive: false,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries.max(1));
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Decide what a single argv is.
fn classify(argv: Vec<String>) -> CommandKind {
    let basename = Path::new(&argv[0])
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&argv[0]);

    match PkgTool::from_program(basename) {
        Some(tool) => {
            let args: Vec<String> = argv[1..].to_vec();
            let verb = extract_verb(tool, &args);
            CommandKind::PackageManager(PkgInvocation { tool, verb, args })
        }
        None => CommandKind::Generic { argv },
    }
}

/// Options that consume the following token, so it must not be mistaken
/// for the verb.
const APT_VALUE_OPTS: &[&str] = &["-o", "-c", "-t", "-a"];

fn extract_verb(tool: PkgTool, args: &[String]) -> Option<String> {
    match tool {
        PkgTool::Apt | PkgTool::AptGet => {
            let mut skip_next = false;
            for arg in args {
                if skip_next {
                    skip_next = false;
                    continue;
                }
                if APT_VALUE_OPTS.contains(&arg.as_str()) {
                    skip_next = true;
                    continue;
                }
                if arg.starts_with('-') {
                    continue;
                }
                return Some(arg.clone());
            }
            None
        }
        // dpkg verbs are themselves options (--configure, --install, -i).
        PkgTool::Dpkg => args
            .iter()
            .find(|a| a.starts_with('-'))
            .map(|a| a.trim_start_matches('-').to_string()),
    }
}

/// Tokenize a command line with shell-style quoting.
///
/// Single quotes protect everything; double quotes and bare text honor
/// backslash escapes. Quotes themselves never reach the output, so `''`
/// produces an empty token.
pub(crate) fn split_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut in_single = false;
    let mut in_double = false;

    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}
