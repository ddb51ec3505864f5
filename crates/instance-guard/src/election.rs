//! File-lock based leader election.
//!
//! The first process to take an exclusive OS lock on the identity's lock file
//! becomes the leader. The kernel drops the lock when the holder exits for any
//! reason, including a crash or SIGKILL, so no cleanup step is ever needed
//! before the next process can win the election.
//!
//! Acquisition never waits: a follower must fail fast and move on to
//! notifying the leader.

use crate::error::{InstanceError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ownership token for the election lock.
///
/// The lock is held for as long as this value lives. Dropping the handle (or
/// exiting the process) releases it.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // Closing the descriptor releases it too.
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

/// Non-blocking leader election over a named lock file.
#[derive(Debug, Clone)]
pub struct LeaderElection {
    lock_path: PathBuf,
    shared: bool,
}

impl LeaderElection {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            shared: false,
        }
    }

    /// Make a lock file this process creates writable by every user.
    ///
    /// Used for machine-wide locks so that whichever user leads next can
    /// record its PID there.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Try to become the leader without waiting.
    ///
    /// Returns `Some(handle)` when this call now holds the lock, `None` when a
    /// live process already holds it, and `LockUnavailable` when the lock
    /// could not be created or queried at all. The last case is never folded
    /// into `None`.
    pub fn try_acquire(&self) -> Result<Option<LockHandle>> {
        let (file, writable) = self.open_lock_file()?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut handle = LockHandle {
                    file,
                    path: self.lock_path.clone(),
                };
                if writable {
                    if let Err(e) = write_holder_pid(&mut handle.file) {
                        debug!("Could not record leader PID in {}: {}", self.lock_path.display(), e);
                    }
                }
                debug!("Acquired election lock {}", self.lock_path.display());
                Ok(Some(handle))
            }
            Err(e) if is_contended(&e) => {
                debug!("Election lock {} is held by another process", self.lock_path.display());
                Ok(None)
            }
            Err(e) => Err(InstanceError::lock_unavailable(e, &self.lock_path)),
        }
    }

    /// PID recorded by the current leader, if readable.
    ///
    /// Diagnostic only. On Windows the leader's exclusive lock prevents other
    /// handles from reading the file, so this returns `None` there.
    pub fn read_holder_pid(&self) -> Option<u32> {
        let mut contents = String::new();
        File::open(&self.lock_path)
            .ok()?
            .read_to_string(&mut contents)
            .ok()?;
        contents.trim().parse().ok()
    }

    /// Open (creating if needed) the lock file.
    ///
    /// Falls back to a read-only descriptor when read-write access is denied,
    /// which happens for global-scope lock files created by another user.
    fn open_lock_file(&self) -> Result<(File, bool)> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InstanceError::lock_unavailable(e, &self.lock_path))?;
        }

        let read_write = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path);

        match read_write {
            Ok(file) => {
                if self.shared {
                    grant_shared_access(&file, &self.lock_path);
                }
                Ok((file, true))
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "No write access to {}, locking read-only",
                    self.lock_path.display()
                );
                let file = OpenOptions::new()
                    .read(true)
                    .open(&self.lock_path)
                    .map_err(|e| InstanceError::lock_unavailable(e, &self.lock_path))?;
                Ok((file, false))
            }
            Err(e) => Err(InstanceError::lock_unavailable(e, &self.lock_path)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn grant_shared_access(file: &File, path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let already_shared = file
        .metadata()
        .map(|meta| meta.permissions().mode() & 0o666 == 0o666)
        .unwrap_or(false);
    if already_shared {
        return;
    }
    // Only the owner may change the mode.
    if let Err(e) = file.set_permissions(std::fs::Permissions::from_mode(0o666)) {
        debug!("Could not share lock file {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn grant_shared_access(_file: &File, _path: &Path) {}

fn write_holder_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}
