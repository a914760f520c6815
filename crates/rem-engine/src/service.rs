//! systemd unit probes and restarts.
//!
//! Thin wrappers around `systemctl` through the [`CommandRunner`]: activity
//! and load-state probes are captured quietly, restarts stream like any other
//! command. Callers on an alternate sysroot should not call into here at all;
//! the units visible to systemd belong to the live system.

use std::time::Duration;

use tracing::{debug, warn};

use rem_common::Result;

use crate::detect::AuthBackend;
use crate::runner::{CommandResult, CommandRunner, CommandSpec};

/// RStudio Server's systemd unit.
pub const RSTUDIO_UNIT: &str = "rstudio-server";

/// nginx's systemd unit.
pub const NGINX_UNIT: &str = "nginx";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_TIMEOUT: Duration = Duration::from_secs(90);

/// True when systemd reports the unit active right now.
///
/// Probe failures (no systemd, no such unit) count as inactive.
pub fn is_active(runner: &CommandRunner, unit: &str) -> bool {
    let probe = runner.capture(
        &format!("probe {unit} activity"),
        &["systemctl", "is-active", "--quiet", unit],
        PROBE_TIMEOUT,
    );
    match probe {
        Ok(output) => output.success(),
        Err(err) => {
            debug!("could not probe {unit}: {err}");
            false
        }
    }
}

/// True when the unit file is present and loaded, active or not.
pub fn unit_installed(runner: &CommandRunner, unit: &str) -> bool {
    let probe = runner.capture(
        &format!("probe {unit} load state"),
        &["systemctl", "show", "-p", "LoadState", "--value", unit],
        PROBE_TIMEOUT,
    );
    match probe {
        Ok(output) => output.success() && output.stdout.trim() == "loaded",
        Err(err) => {
            debug!("could not query {unit}: {err}");
            false
        }
    }
}

/// Restart a unit once, with a bounded wait. No retries: a restart that
/// failed is a condition to report, not to hammer.
pub fn restart(runner: &CommandRunner, unit: &str) -> Result<CommandResult> {
    let argv = vec![
        "systemctl".to_string(),
        "restart".to_string(),
        unit.to_string(),
    ];
    let spec = CommandSpec::from_argv(format!("restart {unit}"), argv)?
        .with_retries(1)
        .with_timeout(RESTART_TIMEOUT);
    runner.run_checked(&spec)
}

/// Units touched after a restore, and how each fared.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub restarted: Vec<String>,
    pub failed: Vec<String>,
}

/// Bounce every service whose configuration a restore may have replaced:
/// the detected auth stack first (identity resolution must settle before
/// sessions land), then RStudio Server, then nginx. Units that are not
/// installed are skipped quietly.
pub fn reconcile_after_restore(runner: &CommandRunner, backend: AuthBackend) -> ReconcileOutcome {
    let mut units: Vec<&str> = backend.units().to_vec();
    units.push(RSTUDIO_UNIT);
    units.push(NGINX_UNIT);

    let mut outcome = ReconcileOutcome::default();
    for unit in units {
        if !unit_installed(runner, unit) {
            debug!("{unit} not installed, skipping restart");
            continue;
        }

        match restart(runner, unit) {
            Ok(_) => outcome.restarted.push(unit.to_string()),
            Err(err) => {
                warn!("restart of {unit} failed: {err}");
                outcome.failed.push(unit.to_string());
            }
        }
    }

    outcome
}
