//! Effective-uid privilege checks.

use crate::error::{Error, Result};

/// True when the process runs with effective uid 0.
pub fn euid_is_root() -> bool {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() == 0 }
}

/// Fail with a structured error unless running as root.
///
/// Callers skip this check when operating on a staged tree instead of the
/// live system.
pub fn require_root(operation: &str) -> Result<()> {
    if euid_is_root() {
        Ok(())
    } else {
        Err(Error::RootRequired {
            operation: operation.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_root_matches_euid() {
        // The suite runs as root in CI containers and unprivileged locally;
        // assert consistency rather than a fixed outcome.
        let result = require_root("unit test");
        assert_eq!(result.is_ok(), euid_is_root());
    }
}
