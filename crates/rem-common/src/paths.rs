//! System path resolution.
//!
//! Every filesystem location the engine touches goes through [`SystemPaths`],
//! which prefixes an alternate root when one is configured. Production runs
//! use `/`; tests point `REM_SYSROOT` at a scratch directory and exercise the
//! full backup/restore machinery without privileges.

use std::path::{Path, PathBuf};

/// Base directory for timestamped backup sessions.
pub const BACKUP_BASE: &str = "/var/backups/r_env_manager";

/// The engine's own configuration and template directory.
pub const CONFIG_DIR: &str = "/etc/r_env_manager";

/// Directory holding the engine's own log files.
pub const LOG_DIR: &str = "/var/log/r_env_manager";

/// File name of the durable log inside [`LOG_DIR`].
pub const LOG_FILE_NAME: &str = "rem.log";

/// dpkg configuration drop-in directory.
pub const DPKG_CFG_DIR: &str = "/etc/dpkg/dpkg.cfg.d";

/// Name of the drop-in written once to keep documentation out of installs.
pub const DPKG_NODOC_NAME: &str = "01_rem_nodoc";

/// apt/dpkg lock files swept before package operations.
pub const PKG_LOCK_FILES: &[&str] = &[
    "/var/lib/dpkg/lock",
    "/var/lib/dpkg/lock-frontend",
    "/var/lib/apt/lists/lock",
    "/var/cache/apt/archives/lock",
];

/// Resolves absolute system paths against a configurable root.
///
/// `resolve("/etc/nginx/nginx.conf")` returns the path unchanged when the
/// root is `/`, and `<sysroot>/etc/nginx/nginx.conf` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    sysroot: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SystemPaths {
    pub fn new(sysroot: impl Into<PathBuf>) -> Self {
        Self {
            sysroot: sysroot.into(),
        }
    }

    pub fn sysroot(&self) -> &Path {
        &self.sysroot
    }

    /// True when operating on the live system rather than a staged tree.
    pub fn is_real_root(&self) -> bool {
        self.sysroot == Path::new("/")
    }

    /// Resolve an absolute path against the configured root.
    pub fn resolve(&self, absolute: &str) -> PathBuf {
        self.sysroot.join(absolute.trim_start_matches('/'))
    }

    pub fn backup_base(&self) -> PathBuf {
        self.resolve(BACKUP_BASE)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.resolve(CONFIG_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(LOG_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(LOG_FILE_NAME)
    }

    pub fn dpkg_cfg_dir(&self) -> PathBuf {
        self.resolve(DPKG_CFG_DIR)
    }

    pub fn dpkg_nodoc_file(&self) -> PathBuf {
        self.dpkg_cfg_dir().join(DPKG_NODOC_NAME)
    }

    pub fn pkg_lock_files(&self) -> Vec<PathBuf> {
        PKG_LOCK_FILES.iter().map(|p| self.resolve(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_real_root() {
        let paths = SystemPaths::default();
        assert!(paths.is_real_root());
        assert_eq!(
            paths.resolve("/etc/nginx/nginx.conf"),
            PathBuf::from("/etc/nginx/nginx.conf")
        );
    }

    #[test]
    fn test_resolve_staged_root() {
        let paths = SystemPaths::new("/tmp/stage");
        assert!(!paths.is_real_root());
        assert_eq!(
            paths.resolve("/etc/nginx/nginx.conf"),
            PathBuf::from("/tmp/stage/etc/nginx/nginx.conf")
        );
        assert_eq!(
            paths.backup_base(),
            PathBuf::from("/tmp/stage/var/backups/r_env_manager")
        );
    }

    #[test]
    fn test_lock_files_follow_sysroot() {
        let paths = SystemPaths::new("/stage");
        let locks = paths.pkg_lock_files();
        assert_eq!(locks.len(), PKG_LOCK_FILES.len());
        assert!(locks
            .iter()
            .all(|p| p.starts_with("/stage/var")));
    }
}
