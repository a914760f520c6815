//! Durable log file layer.
//!
//! Appends one `YYYY-MM-DD HH:MM:SS - LEVEL - message` line per event to the
//! primary log file, and mirrors each line to a secondary "main" log when one
//! is configured. The console already shows the live narrative; this layer is
//! what a later auditor reads, so it never drops below debug and never
//! reorders.
//!
//! The sink is opened lazily on the first event. If the file cannot be
//! opened (read-only filesystem, missing privileges) the layer degrades to
//! console-only after a single stderr warning rather than failing the run.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// A visitor that pulls the message, the `fatal` marker, and any remaining
/// fields out of an event.
#[derive(Default)]
struct LineVisitor {
    message: Option<String>,
    fatal: bool,
    extras: String,
}

impl LineVisitor {
    fn push_extra(&mut self, name: &str, value: impl std::fmt::Display) {
        if !self.extras.is_empty() {
            self.extras.push(' ');
        }
        let _ = write!(self.extras, "{name}={value}");
    }
}

impl tracing::field::Visit for LineVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push_extra(field.name(), value);
        }
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        if field.name() == "fatal" {
            self.fatal = value;
        } else {
            self.push_extra(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push_extra(field.name(), value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push_extra(field.name(), value);
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.push_extra(field.name(), value);
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.push_extra(field.name(), format_args!("{:?}", value));
        }
    }
}

/// Level tag as it appears in the file. Errors carrying `fatal = true` are
/// tagged FATAL; tracing itself has no level above ERROR.
fn level_tag(level: &tracing::Level, fatal: bool) -> &'static str {
    if fatal {
        return "FATAL";
    }
    match *level {
        tracing::Level::TRACE => "TRACE",
        tracing::Level::DEBUG => "DEBUG",
        tracing::Level::INFO => "INFO",
        tracing::Level::WARN => "WARN",
        tracing::Level::ERROR => "ERROR",
    }
}

enum Sink {
    /// No event has arrived yet.
    Unopened,
    Open { primary: File, secondary: Option<File> },
    /// Open failed once; stay quiet from then on.
    Broken,
}

/// Tracing layer that writes the append-only log file(s).
pub struct FileLayer {
    primary_path: PathBuf,
    secondary_path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl FileLayer {
    /// Layer writing to `primary`, mirroring to `secondary` when it is set
    /// and names a different file.
    pub fn new(primary: PathBuf, secondary: Option<PathBuf>) -> Self {
        let secondary = secondary.filter(|path| *path != primary);
        Self {
            primary_path: primary,
            secondary_path: secondary,
            sink: Mutex::new(Sink::Unopened),
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    fn open_append(path: &Path) -> std::io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn write_line(&self, line: &str) {
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Sink::Unopened = *sink {
            *sink = match Self::open_append(&self.primary_path) {
                Ok(primary) => {
                    let secondary = self.secondary_path.as_deref().and_then(|path| {
                        match Self::open_append(path) {
                            Ok(file) => Some(file),
                            Err(e) => {
                                eprintln!(
                                    "warning: cannot open secondary log {}: {e}",
                                    path.display()
                                );
                                None
                            }
                        }
                    });
                    Sink::Open { primary, secondary }
                }
                Err(e) => {
                    eprintln!(
                        "warning: cannot open log file {}: {e}; logging to console only",
                        self.primary_path.display()
                    );
                    Sink::Broken
                }
            };
        }

        if let Sink::Open { primary, secondary } = &mut *sink {
            let _ = writeln!(primary, "{line}");
            if let Some(secondary) = secondary {
                let _ = writeln!(secondary, "{line}");
            }
        }
    }
}

impl<S> Layer<S> for FileLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message.unwrap_or_default();
        if !visitor.extras.is_empty() {
            if !message.is_empty() {
                message.push(' ');
            }
            let _ = write!(message, "[{}]", visitor.extras);
        }

        let line = format!(
            "{} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level_tag(event.metadata().level(), visitor.fatal),
            message
        );
        self.write_line(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_layer(layer: FileLayer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_line_format_and_level_tag() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rem.log");

        with_layer(FileLayer::new(log.clone(), None), || {
            tracing::info!("installation started");
            tracing::warn!("disk is tight");
        });

        let content = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" - INFO - installation started"), "{}", lines[0]);
        assert!(lines[1].contains(" - WARN - disk is tight"));
        // Timestamp prefix: "YYYY-MM-DD HH:MM:SS - "
        assert_eq!(&lines[0][4..5], "-");
        assert_eq!(&lines[0][10..11], " ");
    }

    #[test]
    fn test_fatal_marker_promotes_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rem.log");

        with_layer(FileLayer::new(log.clone(), None), || {
            tracing::error!(fatal = true, "cannot create backup directory");
            tracing::error!("ordinary failure");
        });

        let content = fs::read_to_string(&log).unwrap();
        assert!(content.contains(" - FATAL - cannot create backup directory"));
        assert!(content.contains(" - ERROR - ordinary failure"));
    }

    #[test]
    fn test_extra_fields_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rem.log");

        with_layer(FileLayer::new(log.clone(), None), || {
            tracing::info!(attempts = 3_u32, "command failed");
        });

        let content = fs::read_to_string(&log).unwrap();
        assert!(content.contains("command failed [attempts=3]"), "{content}");
    }

    #[test]
    fn test_secondary_sink_duplicates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rem.log");
        let main = dir.path().join("main.log");

        with_layer(FileLayer::new(log.clone(), Some(main.clone())), || {
            tracing::info!("mirrored line");
        });

        assert!(fs::read_to_string(&log).unwrap().contains("mirrored line"));
        assert!(fs::read_to_string(&main).unwrap().contains("mirrored line"));
    }

    #[test]
    fn test_secondary_equal_to_primary_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rem.log");

        with_layer(FileLayer::new(log.clone(), Some(log.clone())), || {
            tracing::info!("once only");
        });

        let content = fs::read_to_string(&log).unwrap();
        assert_eq!(content.matches("once only").count(), 1);
    }

    #[test]
    fn test_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("var/log/r_env_manager/rem.log");

        with_layer(FileLayer::new(log.clone(), None), || {
            tracing::info!("created on demand");
        });

        assert!(log.is_file());
    }

    #[test]
    fn test_unwritable_sink_degrades_quietly() {
        // A path under a file cannot be created; events must not panic.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let log = blocker.join("rem.log");

        with_layer(FileLayer::new(log, None), || {
            tracing::info!("goes nowhere");
            tracing::info!("still no panic");
        });
    }
}
