//! R Environment Manager reconciliation engine.
//!
//! The engine turns a freshly provisioned Ubuntu host into a configured
//! RStudio Server / Nginx / domain-auth machine, and keeps it that way across
//! re-runs. Every operation is idempotent: running it twice converges to the
//! same system state.
//!
//! The crate is organized around four components:
//!
//! - [`runner`] — external command execution with bounded retries, hard
//!   timeouts, and apt/dpkg-aware preparation
//! - [`template`] — placeholder substitution for config files and systemd
//!   units, with correctness-critical value escaping
//! - [`backup`] — timestamped configuration snapshots and restore
//! - [`detect`] — authentication backend discovery (SSSD vs Samba/Winbind)
//!
//! All filesystem access is routed through [`rem_common::SystemPaths`], so an
//! alternate root can stand in for `/` in tests.

pub mod backup;
pub mod context;
pub mod detect;
pub mod runner;
pub mod service;
pub mod template;

pub use backup::BackupManager;
pub use context::{EngineContext, RunnerSettings};
pub use detect::AuthBackend;
pub use runner::spec::{CommandKind, CommandSpec, PkgInvocation, PkgTool};
pub use runner::{CommandResult, CommandRunner};
