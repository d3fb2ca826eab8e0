//! Cross-process coherence: write lock + epoch sentinel.
//!
//! Two files in the store directory coordinate every process that opens the
//! same store:
//!
//! - `.chroma.lock`: empty advisory-lock file. Writers hold an exclusive
//!   lock for the duration of a write group.
//! - `.chroma.epoch`: sentinel whose modification time is the logical
//!   clock. Writers bump it after committing; readers compare it against the
//!   last mtime they observed and reload their in-memory index when it
//!   advanced.
//!
//! A process-local mutex guards advisory-lock acquisition so threads within
//! one process never race on the lock file itself.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::shared::models::Result;

pub const LOCK_FILENAME: &str = ".chroma.lock";
pub const EPOCH_FILENAME: &str = ".chroma.epoch";

/// Coordinates writers and readers of one store directory.
pub struct Coherence {
    lock_path: PathBuf,
    epoch_path: PathBuf,
    local: Mutex<()>,
    last_epoch: Mutex<Option<SystemTime>>,
    bump_counter: Mutex<u64>,
}

impl Coherence {
    pub fn new(store_dir: &Path) -> Self {
        Self {
            lock_path: store_dir.join(LOCK_FILENAME),
            epoch_path: store_dir.join(EPOCH_FILENAME),
            local: Mutex::new(()),
            last_epoch: Mutex::new(None),
            bump_counter: Mutex::new(0),
        }
    }

    /// Acquire the exclusive write lock (blocking). The returned guard must
    /// be committed to publish the write; dropping it releases the lock
    /// either way.
    pub fn acquire(&self) -> Result<WriteGuard<'_>> {
        let local = self.local.lock();
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        Ok(WriteGuard {
            coherence: self,
            lock_file: file,
            _local: local,
        })
    }

    /// Current sentinel mtime, if the sentinel exists.
    pub fn epoch_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.epoch_path)
            .and_then(|m| m.modified())
            .ok()
    }

    /// The sentinel mtime this process last observed.
    pub fn last_epoch(&self) -> Option<SystemTime> {
        *self.last_epoch.lock()
    }

    /// Returns the observed sentinel mtime when it is newer than what this
    /// process last saw (or appeared since open). `None` means fresh.
    pub fn check_stale(&self) -> Option<SystemTime> {
        let observed = self.epoch_mtime()?;
        let last = *self.last_epoch.lock();
        match last {
            Some(last) if observed <= last => None,
            _ => Some(observed),
        }
    }

    /// Record the sentinel mtime this process is now consistent with.
    pub fn mark_fresh(&self, observed: SystemTime) {
        *self.last_epoch.lock() = Some(observed);
    }

    /// Rewrite the sentinel so its mtime strictly advances past the previous
    /// value, then record the new mtime as our own.
    fn bump_epoch(&self) -> Result<SystemTime> {
        let previous = self.epoch_mtime();
        // Coarse-mtime filesystems need a beat before the clock ticks
        for attempt in 0..200 {
            let mut counter = self.bump_counter.lock();
            *counter += 1;
            let mut file = File::create(&self.epoch_path)?;
            write!(file, "{}", *counter)?;
            drop(counter);
            file.sync_all()?;

            let observed = self.epoch_mtime();
            match (previous, observed) {
                (_, None) => {}
                (None, Some(now)) => {
                    self.mark_fresh(now);
                    return Ok(now);
                }
                (Some(prev), Some(now)) if now > prev => {
                    self.mark_fresh(now);
                    return Ok(now);
                }
                _ => {}
            }
            if attempt % 20 == 19 {
                debug!("epoch mtime has not advanced yet, retrying");
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        // mtime resolution too coarse to observe the tick; fall back to the
        // raw observed value so readers still converge
        let observed = self.epoch_mtime().unwrap_or(SystemTime::now());
        self.mark_fresh(observed);
        Ok(observed)
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn epoch_path(&self) -> &Path {
        &self.epoch_path
    }
}

/// Exclusive write lock over the store directory.
pub struct WriteGuard<'a> {
    coherence: &'a Coherence,
    lock_file: File,
    _local: MutexGuard<'a, ()>,
}

impl WriteGuard<'_> {
    /// Publish the write: bump the epoch sentinel and release the lock.
    pub fn commit(self) -> Result<()> {
        self.coherence.bump_epoch()?;
        Ok(())
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_epoch_before_first_write() {
        let dir = TempDir::new().unwrap();
        let coherence = Coherence::new(dir.path());
        assert!(coherence.epoch_mtime().is_none());
        assert!(coherence.last_epoch().is_none());
        assert!(coherence.check_stale().is_none());
    }

    #[test]
    fn test_commit_creates_epoch_and_marks_fresh() {
        let dir = TempDir::new().unwrap();
        let coherence = Coherence::new(dir.path());

        let guard = coherence.acquire().unwrap();
        guard.commit().unwrap();

        assert!(coherence.epoch_path().exists());
        assert!(coherence.lock_path().exists());
        assert!(coherence.last_epoch().is_some());
        // Our own write is not stale to us
        assert!(coherence.check_stale().is_none());
    }

    #[test]
    fn test_epoch_strictly_advances() {
        let dir = TempDir::new().unwrap();
        let coherence = Coherence::new(dir.path());

        coherence.acquire().unwrap().commit().unwrap();
        let first = coherence.last_epoch().unwrap();

        coherence.acquire().unwrap().commit().unwrap();
        let second = coherence.last_epoch().unwrap();

        assert!(second > first);
    }

    #[test]
    fn test_external_bump_is_stale() {
        let dir = TempDir::new().unwrap();
        let a = Coherence::new(dir.path());
        let b = Coherence::new(dir.path());

        a.acquire().unwrap().commit().unwrap();

        // b never observed the sentinel, so it sees the write as stale
        let observed = b.check_stale().expect("expected stale");
        b.mark_fresh(observed);
        assert!(b.check_stale().is_none());

        // another write from a makes b stale again
        a.acquire().unwrap().commit().unwrap();
        assert!(b.check_stale().is_some());
    }

    #[test]
    fn test_uncommitted_guard_does_not_bump() {
        let dir = TempDir::new().unwrap();
        let coherence = Coherence::new(dir.path());

        let guard = coherence.acquire().unwrap();
        drop(guard);
        assert!(coherence.epoch_mtime().is_none());
    }
}
