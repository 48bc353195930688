//! Advisory database locking via sidecar lock files.
//!
//! A lock on `vault.psafe3` is the file `vault.plk`, created atomically
//! with `O_EXCL` semantics and holding `user@host:pid` so a conflicting
//! opener can tell the user who to go talk to. Locks are reentrant
//! within a process: lock twice, unlock twice, and only the final unlock
//! removes the file.

use crate::error::StoreError;
use crate::ident;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_EXTENSION: &str = "plk";

/// Reentrant advisory lock on a database file.
pub struct FileLock {
    lock_path: PathBuf,
    identity: String,
    count: u32,
}

impl FileLock {
    /// Prepare a lock handle for the given database path. No file is
    /// touched until [`lock`](Self::lock) is called.
    #[must_use]
    pub fn new(db_path: &Path) -> Self {
        Self {
            lock_path: lock_path_for(db_path),
            identity: ident::lock_identity(),
            count: 0,
        }
    }

    /// Acquire the lock, or bump the count if this handle already holds
    /// it.
    ///
    /// # Errors
    ///
    /// `LockConflict` with the holder's identity when someone else has
    /// the lock; `CantOpen` when the lock file cannot be created for any
    /// other reason.
    pub fn lock(&mut self) -> Result<(), StoreError> {
        if self.count > 0 {
            self.count = self.count.saturating_add(1);
            return Ok(());
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(self.identity.as_bytes()) {
                    let _ = fs::remove_file(&self.lock_path);
                    return Err(StoreError::WriteFailure(e.to_string()));
                }
                debug!(path = %self.lock_path.display(), "lock acquired");
                self.count = 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&self.lock_path)
                    .unwrap_or_else(|_| "unknown".into());
                warn!(path = %self.lock_path.display(), %holder, "lock conflict");
                Err(StoreError::LockConflict { holder })
            }
            Err(e) => Err(StoreError::CantOpen {
                path: self.lock_path.clone(),
                source: e,
            }),
        }
    }

    /// Release one level of the lock; the file is removed only when the
    /// count reaches zero. Unlocking an unheld lock is a no-op.
    pub fn unlock(&mut self) {
        match self.count {
            0 => {}
            1 => {
                if let Err(e) = fs::remove_file(&self.lock_path) {
                    warn!(path = %self.lock_path.display(), error = %e, "lock file removal failed");
                }
                self.count = 0;
            }
            _ => self.count = self.count.saturating_sub(1),
        }
    }

    /// Returns `true` if this handle currently holds the lock.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.count > 0
    }

    /// Identity recorded in the lock file, if one exists.
    #[must_use]
    pub fn holder(&self) -> Option<String> {
        fs::read_to_string(&self.lock_path).ok()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.count > 0 {
            self.count = 1;
            self.unlock();
        }
    }
}

/// Returns `true` if a lock file exists for the given database path.
#[must_use]
pub fn is_locked(db_path: &Path) -> bool {
    lock_path_for(db_path).exists()
}

/// Sidecar lock-file path for a database path.
///
/// The extension is normally replaced (`vault.psafe3` → `vault.plk`),
/// except for `.cfg` files where it is appended (`site.cfg` →
/// `site.cfg.plk`) so a config file and a database with the same stem
/// lock independently.
fn lock_path_for(db_path: &Path) -> PathBuf {
    if db_path.extension().is_some_and(|e| e == "cfg") {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".");
        name.push(LOCK_EXTENSION);
        PathBuf::from(name)
    } else {
        db_path.with_extension(LOCK_EXTENSION)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
