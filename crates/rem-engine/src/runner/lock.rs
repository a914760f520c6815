//! Advisory-lock probing for package-manager lock files.
//!
//! dpkg and apt guard their databases with fcntl record locks on files such
//! as `/var/lib/dpkg/lock-frontend`. A crashed run leaves the file behind
//! with no lock on it; a live run holds the lock. The sweep in
//! [`super::pkg`] only removes files nothing is holding.

use fs2::FileExt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Answers "is some process holding this lock file right now?".
///
/// Injectable so tests can simulate held and stale locks without spawning
/// package managers.
pub trait LockInspector: Send + Sync {
    fn is_held(&self, path: &Path) -> io::Result<bool>;
}

/// Probes both lock flavors found in the wild: BSD `flock` locks and POSIX
/// fcntl record locks (the kind dpkg and apt actually take).
#[derive(Debug, Default)]
pub struct AdvisoryLockProbe;

impl LockInspector for AdvisoryLockProbe {
    fn is_held(&self, path: &Path) -> io::Result<bool> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // flock check: acquiring and releasing is the only portable probe.
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(e) => return Err(e),
        }

        // fcntl F_GETLK reports whether a write lock would conflict. Note
        // that a process never conflicts with its own fcntl locks.
        let mut probe: libc::flock = unsafe { std::mem::zeroed() };
        probe.l_type = libc::F_WRLCK as libc::c_short;
        probe.l_whence = libc::SEEK_SET as libc::c_short;
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut probe) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(probe.l_type != libc::F_UNLCK as libc::c_short)
    }
}
