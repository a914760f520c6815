//! The snapshot manifest.
//!
//! A fixed list of configuration paths captures everything this engine may
//! rewrite: nginx vhosts and snippets, RStudio Server settings, the site R
//! profile, the domain-auth surface (SSSD, Kerberos, NSS, PAM), the
//! self-signed TLS pair the proxy serves, and the engine's own configuration
//! directory. Destinations preserve the source hierarchy under the session
//! directory, so `/etc/nginx/nginx.conf` lands at
//! `<session>/etc/nginx/nginx.conf`.

/// One path to capture and where it lives inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Absolute path on the managed system.
    pub source: String,

    /// Relative destination under the session directory.
    pub dest: String,
}

impl ManifestEntry {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }

    /// Entry whose destination mirrors the source path.
    pub fn mirrored(source: &str) -> Self {
        Self::new(source, source.trim_start_matches('/'))
    }
}

/// Configuration paths worth a snapshot, files and directories alike.
pub const SYSTEM_TARGETS: &[&str] = &[
    "/etc/nginx/sites-available",
    "/etc/nginx/snippets",
    "/etc/nginx/nginx.conf",
    "/etc/rstudio/rserver.conf",
    "/etc/rstudio/rsession.conf",
    "/etc/R/Rprofile.site",
    "/etc/sssd/sssd.conf",
    "/etc/krb5.conf",
    "/etc/nsswitch.conf",
    "/etc/pam.d",
    "/etc/ssl/certs/r-env-selfsigned.crt",
    "/etc/ssl/private/r-env-selfsigned.key",
    rem_common::paths::CONFIG_DIR,
];

/// The default manifest covering [`SYSTEM_TARGETS`].
pub fn system_manifest() -> Vec<ManifestEntry> {
    SYSTEM_TARGETS
        .iter()
        .map(|path| ManifestEntry::mirrored(path))
        .collect()
}
