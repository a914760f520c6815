//! Timestamped configuration snapshots and restore.
//!
//! Sessions live under `<base>/<YYYY-MM-DD>/backup_<YYYYMMDD_HHMMSS>/`, with
//! the captured files laid out under their original hierarchy and a
//! `session.json` sidecar recording what was taken and the checksum of each
//! stored file. Restoring replaces the live paths wholesale from the newest
//! session and then bounces the services that read them.

pub mod manifest;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use rem_common::{Error, Result};

use crate::context::EngineContext;
use crate::detect;
use crate::runner::CommandRunner;
use crate::service;

use self::manifest::{system_manifest, ManifestEntry};

/// Session directory names start with this prefix.
pub const SESSION_PREFIX: &str = "backup_";

/// Sidecar file describing a session.
pub const SESSION_METADATA: &str = "session.json";

/// Sessions kept by an explicit prune unless told otherwise.
pub const DEFAULT_RETENTION: usize = 5;

/// What kind of payload a manifest item produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Directory,
}

/// One captured item inside the `session.json` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Absolute path on the managed system.
    pub source: String,

    /// Relative path of the stored copy inside the session.
    pub dest: String,

    pub kind: ItemKind,

    /// SHA-256 of the stored copy; files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Size of the stored copy in bytes; files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// Session sidecar, serialized as `session.json` next to the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,

    /// RFC 3339 creation time, local offset.
    pub created_at: String,

    pub hostname: String,

    pub item_count: usize,

    pub items: Vec<ItemMetadata>,
}

impl SessionMetadata {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::SessionMetadata(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::SessionMetadata(format!("{}: {e}", path.display())))
    }
}

/// A discovered session directory, newest first in listings.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub path: PathBuf,

    /// Directory name, e.g. `backup_20260823_141500`.
    pub id: String,

    /// Day partition the session lives under, e.g. `2026-08-23`.
    pub day: String,

    /// Creation time from the sidecar, when readable.
    pub created_at: Option<String>,

    /// Item count from the sidecar, when readable.
    pub item_count: Option<usize>,
}

/// Outcome of [`BackupManager::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub session: PathBuf,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of [`BackupManager::restore_latest`].
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub session: PathBuf,
    pub restored: usize,
    pub failed: usize,
    pub services_restarted: Vec<String>,
    pub services_failed: Vec<String>,

    /// True when service reconciliation was skipped (alternate sysroot).
    pub services_skipped: bool,
}

/// Outcome of [`BackupManager::verify_latest`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub session: PathBuf,
    pub checked: usize,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Creates, lists, restores, verifies, and prunes backup sessions.
pub struct BackupManager {
    ctx: Arc<EngineContext>,
    manifest: Vec<ManifestEntry>,
}

impl BackupManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self::with_manifest(ctx, system_manifest())
    }

    /// Manager over a caller-supplied manifest. Tests point this at scratch
    /// trees; production uses [`system_manifest`].
    pub fn with_manifest(ctx: Arc<EngineContext>, manifest: Vec<ManifestEntry>) -> Self {
        Self { ctx, manifest }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.ctx.paths.backup_base()
    }

    /// The session directory for this run, created on first use and reused
    /// by every later snapshot in the same process.
    pub fn ensure_session(&self) -> Result<PathBuf> {
        let mut slot = match self.ctx.backup_session_slot().lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(path) = slot.as_ref() {
            if path.is_dir() {
                return Ok(path.clone());
            }
        }
        let created = self.create_session_dir()?;
        *slot = Some(created.clone());
        Ok(created)
    }

    /// Capture every manifest item that exists into this run's session.
    ///
    /// Missing items are skipped, and a failure on one item never aborts the
    /// rest. The session directory and its sidecar are written even when
    /// nothing was captured, so a fresh install still records that a snapshot
    /// ran. Snapshotting again in the same run rewrites the same session.
    pub fn snapshot(&self) -> Result<SnapshotReport> {
        let session_dir = self.ensure_session()?;
        let session_id = session_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut copied = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;
        let mut items = Vec::new();

        for entry in &self.manifest {
            let live = self.ctx.paths.resolve(&entry.source);
            // Follows symlinks: the referenced content is what gets captured,
            // and a broken link counts as missing.
            let meta = match fs::metadata(&live) {
                Ok(meta) => meta,
                Err(_) => {
                    debug!("{} not present, skipping", entry.source);
                    skipped += 1;
                    continue;
                }
            };

            let stored = session_dir.join(&entry.dest);
            let outcome = if meta.is_dir() {
                copy_tree(&live, &stored).map(|files| {
                    debug!("captured {} ({files} files)", entry.source);
                    ItemMetadata {
                        source: entry.source.clone(),
                        dest: entry.dest.clone(),
                        kind: ItemKind::Directory,
                        sha256: None,
                        bytes: None,
                    }
                })
            } else {
                copy_file_preserving(&live, &stored).and_then(|bytes| {
                    let sha256 = sha256_file(&stored)?;
                    debug!("captured {} ({bytes} bytes)", entry.source);
                    Ok(ItemMetadata {
                        source: entry.source.clone(),
                        dest: entry.dest.clone(),
                        kind: ItemKind::File,
                        sha256: Some(sha256),
                        bytes: Some(bytes),
                    })
                })
            };

            match outcome {
                Ok(item) => {
                    items.push(item);
                    copied += 1;
                }
                Err(err) => {
                    warn!("could not back up {}: {err}", entry.source);
                    failed += 1;
                }
            }
        }

        let metadata = SessionMetadata {
            session_id,
            created_at: Local::now().to_rfc3339(),
            hostname: hostname(&self.ctx),
            item_count: items.len(),
            items,
        };
        metadata.save(&session_dir.join(SESSION_METADATA))?;

        if copied == 0 {
            warn!(
                "nothing to back up; session {} holds only metadata",
                session_dir.display()
            );
        } else {
            info!("secured {copied} items into {}", session_dir.display());
        }

        Ok(SnapshotReport {
            session: session_dir,
            copied,
            skipped,
            failed,
        })
    }

    /// All sessions across day partitions, newest first.
    ///
    /// Ordering falls out of the `backup_YYYYMMDD_HHMMSS` naming; a corrupt
    /// or missing sidecar demotes the detail fields to `None` but keeps the
    /// session listed.
    pub fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let base = self.base_dir();
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for day_entry in fs::read_dir(&base)? {
            let day_entry = day_entry?;
            let day = day_entry.file_name().to_string_lossy().into_owned();
            if !day_entry.path().is_dir() || !is_day_partition(&day) {
                continue;
            }

            for entry in fs::read_dir(day_entry.path())? {
                let entry = entry?;
                let id = entry.file_name().to_string_lossy().into_owned();
                if !entry.path().is_dir() || !id.starts_with(SESSION_PREFIX) {
                    continue;
                }

                let sidecar = SessionMetadata::load(&entry.path().join(SESSION_METADATA)).ok();
                sessions.push(SessionInfo {
                    path: entry.path(),
                    id,
                    day: day.clone(),
                    created_at: sidecar.as_ref().map(|m| m.created_at.clone()),
                    item_count: sidecar.as_ref().map(|m| m.items.len()),
                });
            }
        }

        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }

    /// The newest session, or [`Error::NoSessions`] when none exist.
    pub fn latest(&self) -> Result<SessionInfo> {
        self.sessions()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoSessions {
                base: self.base_dir(),
            })
    }

    /// Replace live configuration from the newest session.
    ///
    /// `confirm` is consulted with the chosen session before anything is
    /// touched; a `false` answer aborts cleanly with `Ok(None)`. Each restored
    /// path is replaced wholesale (the live file or tree is removed first), a
    /// failure on one item never aborts the rest, and afterwards the services
    /// reading those files are restarted. Service restarts are skipped on an
    /// alternate sysroot, where systemd units do not correspond to the tree
    /// being edited.
    pub fn restore_latest(
        &self,
        runner: &CommandRunner,
        confirm: &mut dyn FnMut(&SessionInfo) -> bool,
    ) -> Result<Option<RestoreReport>> {
        let session = self.latest()?;

        if !confirm(&session) {
            info!("restore of {} declined", session.id);
            return Ok(None);
        }

        // Prefer the sidecar's item list: it names exactly what was captured.
        let items: Vec<ManifestEntry> =
            match SessionMetadata::load(&session.path.join(SESSION_METADATA)) {
                Ok(meta) => meta
                    .items
                    .iter()
                    .map(|i| ManifestEntry::new(i.source.clone(), i.dest.clone()))
                    .collect(),
                Err(err) => {
                    warn!("session sidecar unreadable ({err}); restoring by manifest");
                    self.manifest.clone()
                }
            };

        let mut restored = 0usize;
        let mut failed = 0usize;
        for entry in &items {
            let stored = session.path.join(&entry.dest);
            if !stored.exists() {
                debug!("{} absent from session, skipping", entry.source);
                continue;
            }

            let live = self.ctx.paths.resolve(&entry.source);
            match replace_path(&stored, &live) {
                Ok(()) => {
                    info!("restored {}", entry.source);
                    restored += 1;
                }
                Err(err) => {
                    warn!("could not restore {}: {err}", entry.source);
                    failed += 1;
                }
            }
        }

        let mut report = RestoreReport {
            session: session.path.clone(),
            restored,
            failed,
            services_restarted: Vec::new(),
            services_failed: Vec::new(),
            services_skipped: false,
        };

        if self.ctx.paths.is_real_root() {
            let backend = detect::detect(runner, &self.ctx.paths);
            let outcome = service::reconcile_after_restore(runner, backend);
            report.services_restarted = outcome.restarted;
            report.services_failed = outcome.failed;
        } else {
            debug!("alternate sysroot, leaving services untouched");
            report.services_skipped = true;
        }

        info!(
            "restore of {} finished: {restored} restored, {failed} failed",
            session.id
        );
        Ok(Some(report))
    }

    /// Check the newest session's stored files against their recorded
    /// checksums. Directories carry no checksum and are not checked.
    pub fn verify_latest(&self) -> Result<VerifyReport> {
        let session = self.latest()?;
        let metadata = SessionMetadata::load(&session.path.join(SESSION_METADATA))?;

        let mut checked = 0usize;
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        for item in &metadata.items {
            let Some(expected) = &item.sha256 else {
                continue;
            };

            let stored = session.path.join(&item.dest);
            if !stored.is_file() {
                missing.push(item.source.clone());
                continue;
            }

            checked += 1;
            let actual = sha256_file(&stored)?;
            if actual != *expected {
                warn!("checksum mismatch on stored copy of {}", item.source);
                mismatched.push(item.source.clone());
            }
        }

        Ok(VerifyReport {
            session: session.path,
            checked,
            missing,
            mismatched,
        })
    }

    /// Remove sessions beyond the newest `retain`, returning removed paths.
    /// Day partitions left empty are removed too.
    pub fn prune(&self, retain: usize) -> Result<Vec<PathBuf>> {
        let sessions = self.sessions()?;

        let mut removed = Vec::new();
        for session in sessions.iter().skip(retain) {
            info!("rotating out old backup {}", session.id);
            fs::remove_dir_all(&session.path)?;
            removed.push(session.path.clone());

            if let Some(day_dir) = session.path.parent() {
                let empty = fs::read_dir(day_dir)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if empty {
                    let _ = fs::remove_dir(day_dir);
                }
            }
        }

        Ok(removed)
    }

    /// Create `<base>/<day>/backup_<stamp>`, suffixing on collision so two
    /// snapshots within the same second both land.
    fn create_session_dir(&self) -> Result<PathBuf> {
        let now = Local::now();
        let day_dir = self.base_dir().join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir).map_err(|source| Error::BackupDirCreate {
            path: day_dir.clone(),
            source,
        })?;

        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = day_dir.join(format!("{SESSION_PREFIX}{stamp}"));
        let mut suffix = 1u32;
        while candidate.exists() {
            suffix += 1;
            candidate = day_dir.join(format!("{SESSION_PREFIX}{stamp}_{suffix}"));
        }

        fs::create_dir(&candidate).map_err(|source| Error::BackupDirCreate {
            path: candidate.clone(),
            source,
        })?;
        Ok(candidate)
    }
}

/// `YYYY-MM-DD` directory names partition sessions by day.
fn is_day_partition(name: &str) -> bool {
    name.len() == 10
        && name.chars().enumerate().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        })
}

/// Hostname recorded in the sidecar: `/etc/hostname` under the sysroot,
/// falling back to the HOSTNAME environment variable.
fn hostname(ctx: &EngineContext) -> String {
    if let Ok(content) = fs::read_to_string(ctx.paths.resolve("/etc/hostname")) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// SHA-256 of a file, streamed in 8 KiB chunks.
pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Copy one file, preserving its modification time and (when running as
/// root) its ownership. Permission bits ride along with `fs::copy`.
fn copy_file_preserving(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = fs::copy(src, dst)?;

    let meta = fs::metadata(src)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    if let Err(err) = filetime::set_file_mtime(dst, mtime) {
        debug!("could not preserve mtime on {}: {err}", dst.display());
    }

    if rem_common::euid_is_root() {
        use std::os::unix::fs::MetadataExt;
        if let Err(err) = std::os::unix::fs::chown(dst, Some(meta.uid()), Some(meta.gid())) {
            debug!("could not preserve ownership on {}: {err}", dst.display());
        }
    }

    Ok(bytes)
}

/// Copy a directory tree, returning the number of files copied. Unreadable
/// entries are logged and skipped rather than failing the whole tree.
fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    fs::create_dir_all(dst)?;

    let mut files = 0usize;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry under {}: {err}", src.display());
                continue;
            }
        };

        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_file_preserving(entry.path(), &target)?;
            files += 1;
        } else {
            debug!("skipping special file {}", entry.path().display());
        }
    }

    Ok(files)
}

/// Replace `live` with the stored copy. A stored directory replaces the live
/// path wholesale (remove, then copy — a merge would resurrect nothing and
/// keep strays). A stored file is copied straight over the live file; the
/// live path is removed first only when a directory now sits where the file
/// belongs.
fn replace_path(stored: &Path, live: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(live) {
        if stored.is_dir() || meta.is_dir() {
            if meta.is_dir() {
                fs::remove_dir_all(live)?;
            } else {
                fs::remove_file(live)?;
            }
        }
    }

    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)?;
    }

    if stored.is_dir() {
        copy_tree(stored, live)?;
    } else {
        copy_file_preserving(stored, live)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunnerSettings;
    use rem_common::SystemPaths;
    use tempfile::TempDir;

    fn staged_manager(root: &TempDir) -> BackupManager {
        let ctx = Arc::new(EngineContext::new(
            SystemPaths::new(root.path()),
            RunnerSettings::default(),
        ));
        BackupManager::new(ctx)
    }

    fn seed(root: &TempDir, rel: &str, content: &str) {
        let path = root.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_snapshot_on_fresh_system_records_empty_session() {
        let root = TempDir::new().unwrap();
        let manager = staged_manager(&root);

        let report = manager.snapshot().unwrap();
        assert_eq!(report.copied, 0);
        assert_eq!(report.skipped, manifest::SYSTEM_TARGETS.len());
        assert_eq!(report.failed, 0);

        let sidecar = SessionMetadata::load(&report.session.join(SESSION_METADATA)).unwrap();
        assert_eq!(sidecar.item_count, 0);
        assert!(sidecar.items.is_empty());
    }

    #[test]
    fn test_snapshot_captures_files_and_trees() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/nginx/nginx.conf", "worker_processes auto;\n");
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        seed(&root, "etc/pam.d/common-auth", "auth required pam_unix.so\n");
        seed(&root, "etc/pam.d/common-session", "session required pam_unix.so\n");
        let manager = staged_manager(&root);

        let report = manager.snapshot().unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(report.failed, 0);

        let stored_conf = report.session.join("etc/nginx/nginx.conf");
        assert_eq!(
            fs::read_to_string(stored_conf).unwrap(),
            "worker_processes auto;\n"
        );
        assert!(report.session.join("etc/pam.d/common-session").is_file());

        let sidecar = SessionMetadata::load(&report.session.join(SESSION_METADATA)).unwrap();
        assert_eq!(sidecar.item_count, 3);
        let pam = sidecar
            .items
            .iter()
            .find(|i| i.source == "/etc/pam.d")
            .unwrap();
        assert_eq!(pam.kind, ItemKind::Directory);
        assert!(pam.sha256.is_none());
        let krb = sidecar
            .items
            .iter()
            .find(|i| i.source == "/etc/krb5.conf")
            .unwrap();
        assert_eq!(krb.kind, ItemKind::File);
        assert!(krb.sha256.is_some());
        assert_eq!(krb.bytes, Some("[libdefaults]\n".len() as u64));
    }

    #[test]
    fn test_sessions_listed_newest_first() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");

        // Separate managers model separate runs, each with its own session.
        let first = staged_manager(&root).snapshot().unwrap();
        let second = staged_manager(&root).snapshot().unwrap();
        assert_ne!(first.session, second.session);

        let manager = staged_manager(&root);
        let sessions = manager.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].path, second.session);
        assert_eq!(sessions[1].path, first.session);
        assert!(sessions[0].created_at.is_some());

        let latest = manager.latest().unwrap();
        assert_eq!(latest.path, second.session);
    }

    #[test]
    fn test_snapshot_reuses_session_within_one_run() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        let manager = staged_manager(&root);

        let first = manager.snapshot().unwrap();
        let second = manager.snapshot().unwrap();

        assert_eq!(first.session, second.session);
        assert_eq!(manager.sessions().unwrap().len(), 1);

        // A session rotated out from under the cache is recreated.
        manager.prune(0).unwrap();
        let third = manager.snapshot().unwrap();
        assert!(third.session.is_dir());
        assert_eq!(manager.sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_latest_without_sessions_is_an_error() {
        let root = TempDir::new().unwrap();
        let manager = staged_manager(&root);

        match manager.latest() {
            Err(Error::NoSessions { base }) => {
                assert_eq!(base, manager.base_dir());
            }
            other => panic!("expected NoSessions, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_detects_tampered_payload() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        let manager = staged_manager(&root);

        let report = manager.snapshot().unwrap();
        assert!(manager.verify_latest().unwrap().ok());

        fs::write(report.session.join("etc/krb5.conf"), "tampered\n").unwrap();
        let verify = manager.verify_latest().unwrap();
        assert!(!verify.ok());
        assert_eq!(verify.mismatched, vec!["/etc/krb5.conf".to_string()]);
        assert!(verify.missing.is_empty());
    }

    #[test]
    fn test_verify_reports_missing_payload() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        let manager = staged_manager(&root);

        let report = manager.snapshot().unwrap();
        fs::remove_file(report.session.join("etc/krb5.conf")).unwrap();

        let verify = manager.verify_latest().unwrap();
        assert_eq!(verify.missing, vec!["/etc/krb5.conf".to_string()]);
        assert_eq!(verify.checked, 0);
    }

    #[test]
    fn test_prune_keeps_newest_and_clears_empty_days() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        let manager = staged_manager(&root);

        // One stale session from an earlier day, created by hand.
        let old_day = manager.base_dir().join("2020-01-01");
        let old_session = old_day.join("backup_20200101_000000");
        fs::create_dir_all(&old_session).unwrap();

        staged_manager(&root).snapshot().unwrap();
        staged_manager(&root).snapshot().unwrap();
        assert_eq!(manager.sessions().unwrap().len(), 3);

        let removed = manager.prune(1).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&old_session));

        let remaining = manager.sessions().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!old_day.exists());
    }

    #[test]
    fn test_restore_declined_touches_nothing() {
        let root = TempDir::new().unwrap();
        seed(&root, "etc/krb5.conf", "[libdefaults]\n");
        let manager = staged_manager(&root);
        manager.snapshot().unwrap();

        seed(&root, "etc/krb5.conf", "drifted\n");
        let runner = CommandRunner::new(Arc::new(EngineContext::new(
            SystemPaths::new(root.path()),
            RunnerSettings::default(),
        )));

        let mut asked = 0;
        let outcome = manager
            .restore_latest(&runner, &mut |_| {
                asked += 1;
                false
            })
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(asked, 1);
        assert_eq!(
            fs::read_to_string(root.path().join("etc/krb5.conf")).unwrap(),
            "drifted\n"
        );
    }

    #[test]
    fn test_day_partition_names() {
        assert!(is_day_partition("2026-08-23"));
        assert!(!is_day_partition("2026-8-23"));
        assert!(!is_day_partition("20260823"));
        assert!(!is_day_partition("lost+found"));
    }
}
