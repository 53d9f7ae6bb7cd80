//! Sibling lock file guarding a dataset during a merge.
//!
//! The lock is a `<file>.lock` created with `create_new`, so exactly one
//! writer holds it at a time across threads and processes. It records the
//! holder's pid and acquisition time, which also lets a holder tell its own
//! lock apart from one another writer created after reclaiming it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StoreError;

/// Timing knobs for [`DatasetLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up with [`StoreError::LockTimeout`] after waiting this long.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// A lock file older than this is assumed to belong to a killed process
    /// and is removed.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(600),
        }
    }
}

static TOMBSTONE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Held lock; the lock file is removed on drop if it is still ours.
#[derive(Debug)]
pub struct DatasetLock {
    path: PathBuf,
    stamp: String,
}

impl DatasetLock {
    /// Returns the lock file path for `target`.
    #[must_use]
    pub fn lock_path_for(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        target.with_file_name(name)
    }

    /// Blocks until the lock for `target` is acquired.
    ///
    /// # Errors
    ///
    /// - [`StoreError::LockTimeout`] when `options.timeout` elapses first.
    /// - [`StoreError::Io`] when the lock file cannot be created for any
    ///   reason other than already existing.
    pub fn acquire(target: &Path, options: &LockOptions) -> Result<Self, StoreError> {
        let lock_path = Self::lock_path_for(target);
        let started = Instant::now();

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let stamp = format!(
                        "pid={} acquired_at={}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    let stamp = match file.write_all(stamp.as_bytes()) {
                        Ok(()) => stamp,
                        Err(e) => {
                            tracing::debug!(path = %lock_path.display(), error = %e, "could not stamp lock file");
                            String::new()
                        }
                    };
                    tracing::debug!(path = %lock_path.display(), "dataset lock acquired");
                    return Ok(Self {
                        path: lock_path,
                        stamp,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(observed) = stale_contents(&lock_path, options.stale_after) {
                        if reclaim_stale(&lock_path, &observed, options.stale_after) {
                            tracing::warn!(
                                path = %lock_path.display(),
                                stale_after_secs = options.stale_after.as_secs(),
                                "removed stale dataset lock"
                            );
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= options.timeout {
                        return Err(StoreError::LockTimeout { lock_path, waited });
                    }
                    tracing::debug!(path = %lock_path.display(), "dataset lock busy, polling");
                    thread::sleep(options.poll_interval);
                }
                Err(e) => return Err(StoreError::io(lock_path)(e)),
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.stamp => remove_lock_file(&self.path),
            Ok(_) => tracing::warn!(
                path = %self.path.display(),
                "dataset lock was reclaimed by another writer, leaving it in place"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to read dataset lock"),
        }
    }
}

/// The lock file's contents, if it is older than `stale_after`.
fn stale_contents(path: &Path, stale_after: Duration) -> Option<String> {
    if is_stale(path, stale_after) {
        fs::read_to_string(path).ok()
    } else {
        None
    }
}

/// Moves the stale lock aside and deletes it; returns whether it did.
///
/// Of several waiters that judged the same lock stale, the atomic rename lets
/// only one move it. A lock that no longer matches what was observed is a
/// fresh one created in between, so it is linked back into place.
fn reclaim_stale(lock_path: &Path, observed: &str, stale_after: Duration) -> bool {
    let tombstone = tombstone_path(lock_path);
    if fs::rename(lock_path, &tombstone).is_err() {
        return false;
    }
    let reclaimed = fs::read_to_string(&tombstone).is_ok_and(|contents| contents == observed)
        && is_stale(&tombstone, stale_after);
    if !reclaimed {
        if let Err(e) = fs::hard_link(&tombstone, lock_path) {
            tracing::warn!(path = %lock_path.display(), error = %e, "could not restore a live dataset lock");
        }
    }
    remove_lock_file(&tombstone);
    reclaimed
}

fn tombstone_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(
        ".{}.{}.stale",
        std::process::id(),
        TOMBSTONE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    lock_path.with_file_name(name)
}

fn remove_lock_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove dataset lock"),
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= stale_after)
}
