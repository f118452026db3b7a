//! Named crash-injection hooks for fault testing.
//!
//! Each flush step is bracketed by a named hook. With the `crash-points`
//! feature compiled in, a hook armed programmatically (tests) or through the
//! `NERVUSDB_CRASH_POINT` environment variable makes the step fail with an
//! injected I/O error, simulating a crash at exactly that point. Without the
//! feature every hook is a no-op the optimizer removes.

use crate::Result;

pub const BEFORE_INCREMENTAL_WRITE: &str = "before-incremental-write";
pub const BEFORE_PAGE_APPEND: &str = "before-page-append";
pub const BEFORE_MANIFEST_WRITE: &str = "before-manifest-write";
pub const BEFORE_WAL_RESET: &str = "before-wal-reset";

pub const ENV_VAR: &str = "NERVUSDB_CRASH_POINT";

#[cfg(feature = "crash-points")]
mod armed {
    use std::sync::Mutex;

    pub(super) static ARMED: Mutex<Option<String>> = Mutex::new(None);
}

/// Arms a hook for the current process. Overrides the environment variable.
#[cfg(feature = "crash-points")]
pub fn arm(name: &str) {
    *armed::ARMED.lock().unwrap() = Some(name.to_owned());
}

#[cfg(feature = "crash-points")]
pub fn disarm() {
    *armed::ARMED.lock().unwrap() = None;
}

/// Fails with an injected I/O error when `name` is the armed crash point.
#[cfg(feature = "crash-points")]
pub fn hit(name: &str) -> Result<()> {
    let armed = armed::ARMED.lock().unwrap().clone();
    let target = armed.or_else(|| std::env::var(ENV_VAR).ok());
    if target.as_deref() == Some(name) {
        return Err(crate::Error::Io(std::io::Error::other(format!(
            "crash injected at {name}"
        ))));
    }
    Ok(())
}

#[cfg(not(feature = "crash-points"))]
#[inline(always)]
pub fn hit(_name: &str) -> Result<()> {
    Ok(())
}

#[cfg(all(test, feature = "crash-points"))]
mod tests {
    use super::*;

    #[test]
    fn armed_hook_fails_only_its_own_name() {
        arm(BEFORE_WAL_RESET);
        assert!(hit(BEFORE_MANIFEST_WRITE).is_ok());
        assert!(hit(BEFORE_WAL_RESET).is_err());
        disarm();
        assert!(hit(BEFORE_WAL_RESET).is_ok());
    }
}
