//! Authentication backend detection.
//!
//! Decides whether the host authenticates against Active Directory through
//! SSSD or Samba/winbind, checking the most reliable signal first: running
//! services, then well-known configuration files, then `nsswitch.conf`
//! mentions. The answer drives which identity services a restore restarts
//! and which PAM templates apply.

use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rem_common::SystemPaths;

use crate::runner::CommandRunner;
use crate::service;

/// The host's Active Directory integration stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthBackend {
    Sssd,
    Samba,
    None,
}

impl AuthBackend {
    /// Identity services to bounce when this backend's configuration changes.
    pub fn units(&self) -> &'static [&'static str] {
        match self {
            AuthBackend::Sssd => &["sssd"],
            AuthBackend::Samba => &["winbind", "smbd"],
            AuthBackend::None => &[],
        }
    }
}

impl fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthBackend::Sssd => "SSSD",
            AuthBackend::Samba => "SAMBA",
            AuthBackend::None => "NONE",
        };
        f.write_str(name)
    }
}

/// Detect the backend on the live system, probing services via `systemctl`.
pub fn detect(runner: &CommandRunner, paths: &SystemPaths) -> AuthBackend {
    detect_with(paths, &mut |unit| service::is_active(runner, unit))
}

/// Detection with a caller-supplied service probe, in strict precedence
/// order. A running service is trusted over any file: configuration can be
/// left behind by an uninstalled stack, but an active daemon is the one
/// actually answering lookups.
pub fn detect_with(
    paths: &SystemPaths,
    service_active: &mut dyn FnMut(&str) -> bool,
) -> AuthBackend {
    debug!("detecting authentication backend");

    if service_active("sssd") {
        info!("detected SSSD (service active)");
        return AuthBackend::Sssd;
    }
    if service_active("winbind") || service_active("smbd") {
        info!("detected Samba (service active)");
        return AuthBackend::Samba;
    }

    if paths.resolve("/etc/sssd/sssd.conf").is_file() {
        info!("detected SSSD (sssd.conf present)");
        return AuthBackend::Sssd;
    }
    if paths.resolve("/etc/samba/smb.conf").is_file() {
        info!("detected Samba (smb.conf present)");
        return AuthBackend::Samba;
    }

    if let Ok(content) = fs::read_to_string(paths.resolve("/etc/nsswitch.conf")) {
        if content.contains("sss") {
            info!("detected SSSD (nsswitch.conf mentions sss)");
            return AuthBackend::Sssd;
        }
        if content.contains("winbind") {
            info!("detected Samba (nsswitch.conf mentions winbind)");
            return AuthBackend::Samba;
        }
    }

    warn!("no authentication backend detected");
    AuthBackend::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(root: &TempDir, rel: &str, content: &str) {
        let path = root.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_active_sssd_service_wins() {
        let root = TempDir::new().unwrap();
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |unit| unit == "sssd");
        assert_eq!(backend, AuthBackend::Sssd);
    }

    #[test]
    fn test_active_winbind_beats_config_files() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/sssd/sssd.conf", "[sssd]\n");
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |unit| unit == "winbind");
        assert_eq!(backend, AuthBackend::Samba);
    }

    #[test]
    fn test_sssd_conf_checked_before_smb_conf() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/sssd/sssd.conf", "[sssd]\n");
        seed(&root, "etc/samba/smb.conf", "[global]\n");
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |_| false);
        assert_eq!(backend, AuthBackend::Sssd);
    }

    #[test]
    fn test_smb_conf_alone_means_samba() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/samba/smb.conf", "[global]\n");
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |_| false);
        assert_eq!(backend, AuthBackend::Samba);
    }

    #[test]
    fn test_nsswitch_mentions_decide_last() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/nsswitch.conf", "passwd: files winbind\n");
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |_| false);
        assert_eq!(backend, AuthBackend::Samba);

        seed(&root, "etc/nsswitch.conf", "passwd: files sss winbind\n");
        let backend = detect_with(&paths, &mut |_| false);
        assert_eq!(backend, AuthBackend::Sssd);
    }

    #[test]
    fn test_bare_host_detects_nothing() {
        let root = TempDir::new().unwrap();
        let paths = SystemPaths::new(root.path());
        let backend = detect_with(&paths, &mut |_| false);
        assert_eq!(backend, AuthBackend::None);
        assert!(backend.units().is_empty());
    }

    #[test]
    fn test_backend_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&AuthBackend::Sssd).unwrap(),
            "\"SSSD\""
        );
        assert_eq!(
            serde_json::to_string(&AuthBackend::None).unwrap(),
            "\"NONE\""
        );
    }

    #[test]
    fn test_restart_units_per_backend() {
        assert_eq!(AuthBackend::Sssd.units(), &["sssd"]);
        assert_eq!(AuthBackend::Samba.units(), &["winbind", "smbd"]);
    }
}
