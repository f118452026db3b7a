//! Exclusive writer lock file.
//!
//! Presence of `{db}.lock` means a writer holds the database. The file is
//! created with `create_new`, so two writers racing for the same path cannot
//! both win. The lock is advisory for readers; they are refused separately
//! when the WAL holds uncommitted durable work.

use crate::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Pid inside is diagnostic only; presence is the lock.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::LockHeld(path))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn is_held(path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release writer lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.ndb.lock");
        let first = WriterLock::acquire(&path).unwrap();
        assert!(WriterLock::is_held(&path));
        assert!(matches!(
            WriterLock::acquire(&path),
            Err(Error::LockHeld(_))
        ));
        drop(first);
        assert!(!WriterLock::is_held(&path));
        let _second = WriterLock::acquire(&path).unwrap();
    }
}
