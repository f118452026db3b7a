//! Reader registry: per-process-and-epoch files under `P.pages/readers/`.
//!
//! A process holding a snapshot at epoch `e` keeps a `{pid}-{epoch}.reader`
//! file alive; garbage collection derives the set of active epochs from the
//! directory. Staleness is judged by file mtime and, where the platform
//! allows, by checking that the owning pid still exists before touching
//! another process's file.

use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const READERS_DIR: &str = "readers";
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(45);

#[derive(Debug, Serialize, Deserialize)]
struct ReaderFile {
    pid: u32,
    epoch: u64,
    registered_at: chrono::DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReaderRegistry {
    dir: PathBuf,
    pid: u32,
    stale_after: Duration,
    registered: BTreeSet<u64>,
}

impl ReaderRegistry {
    pub fn open(pages_dir: &Path, stale_after: Duration) -> Result<Self> {
        let dir = pages_dir.join(READERS_DIR);
        fs::create_dir_all(&dir)?;
        let registry = Self {
            dir,
            pid: std::process::id(),
            stale_after,
            registered: BTreeSet::new(),
        };
        registry.cleanup_stale();
        Ok(registry)
    }

    fn file_for(&self, epoch: u64) -> PathBuf {
        self.dir.join(format!("{}-{}.reader", self.pid, epoch))
    }

    /// Makes the on-disk registration match exactly the given epochs.
    pub fn sync(&mut self, epochs: &BTreeSet<u64>) -> Result<()> {
        for &epoch in epochs {
            if self.registered.insert(epoch) {
                let body = serde_json::to_vec(&ReaderFile {
                    pid: self.pid,
                    epoch,
                    registered_at: Utc::now(),
                })?;
                fs::write(self.file_for(epoch), body)?;
            }
        }
        let gone: Vec<u64> = self.registered.difference(epochs).copied().collect();
        for epoch in gone {
            self.registered.remove(&epoch);
            let _ = fs::remove_file(self.file_for(epoch));
        }
        Ok(())
    }

    pub fn deregister_all(&mut self) {
        for epoch in std::mem::take(&mut self.registered) {
            let _ = fs::remove_file(self.file_for(epoch));
        }
    }

    /// Epochs some live reader may still observe.
    pub fn active_epochs(&self) -> BTreeSet<u64> {
        let mut out = BTreeSet::new();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let Some((pid, epoch)) = parse_reader_name(&entry.file_name().to_string_lossy())
            else {
                continue;
            };
            if self.is_live(&entry.path(), pid) {
                out.insert(epoch);
            }
        }
        out
    }

    fn is_live(&self, path: &Path, pid: u32) -> bool {
        if pid == self.pid {
            return true;
        }
        match pid_alive(pid) {
            Some(alive) => alive,
            // Unknown liveness: trust the file while its mtime is fresh.
            None => !self.mtime_stale(path),
        }
    }

    fn mtime_stale(&self, path: &Path) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return true;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }

    /// Removes registrations whose owner is provably gone. Files owned by a
    /// pid we cannot interrogate are removed only after their mtime expires.
    fn cleanup_stale(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((pid, epoch)) = parse_reader_name(&name) else {
                continue;
            };
            if pid == self.pid {
                continue;
            }
            let stale = match pid_alive(pid) {
                Some(alive) => !alive,
                None => self.mtime_stale(&entry.path()),
            };
            if stale {
                debug!(pid, epoch, "removing stale reader file");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = %name, error = %e, "failed to remove stale reader file");
                }
            }
        }
    }
}

impl Drop for ReaderRegistry {
    fn drop(&mut self) {
        self.deregister_all();
    }
}

fn parse_reader_name(name: &str) -> Option<(u32, u64)> {
    let stem = name.strip_suffix(".reader")?;
    let (pid, epoch) = stem.split_once('-')?;
    Some((pid.parse().ok()?, epoch.parse().ok()?))
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> Option<bool> {
    Some(Path::new(&format!("/proc/{pid}")).exists())
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> Option<bool> {
    None
}
