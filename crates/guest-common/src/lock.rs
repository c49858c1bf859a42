//! Advisory flock wrappers for daemon-scope and file-scope exclusion.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::warn;

/// Lock acquisition error. Contention gets its own variant so callers can
/// treat "already running" differently from a real I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{} is already locked", path.display())]
    AlreadyLocked { path: PathBuf },

    #[error("lock {}: {detail}", path.display())]
    Io { path: PathBuf, detail: String },
}

/// Exclusive advisory lock on a file, held until dropped. The unlock runs on
/// every exit path, including unwind.
#[derive(Debug)]
pub struct FileLock {
    _flock: Flock<File>,
}

impl FileLock {
    /// Take an exclusive flock on `path`, creating the file if needed.
    ///
    /// A non-blocking attempt against a held lock fails with
    /// [`LockError::AlreadyLocked`].
    pub fn acquire(path: &Path, blocking: bool) -> Result<Self, LockError> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let arg = if blocking {
            FlockArg::LockExclusive
        } else {
            FlockArg::LockExclusiveNonblock
        };
        let flock = Flock::lock(file, arg).map_err(|(_file, errno)| match errno {
            Errno::EWOULDBLOCK => LockError::AlreadyLocked {
                path: path.to_path_buf(),
            },
            errno => LockError::Io {
                path: path.to_path_buf(),
                detail: errno.to_string(),
            },
        })?;
        Ok(Self { _flock: flock })
    }
}

/// Run `f` under a non-blocking exclusive lock on `path`.
///
/// Contention and lock I/O failures are logged and yield `None`; they are
/// never fatal to the calling daemon.
pub fn with_lock<T>(path: &Path, f: impl FnOnce() -> T) -> Option<T> {
    match FileLock::acquire(path, false) {
        Ok(_guard) => Some(f()),
        Err(LockError::AlreadyLocked { .. }) => {
            warn!(path = %path.display(), "lock held elsewhere, skipping");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not take lock, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let guard = FileLock::acquire(&path, false).unwrap();
        assert!(path.exists());
        drop(guard);
    }

    #[test]
    fn held_lock_fails_nonblocking_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let _guard = FileLock::acquire(&path, false).unwrap();

        let err = FileLock::acquire(&path, false).unwrap_err();
        assert!(matches!(err, LockError::AlreadyLocked { .. }), "got {err}");
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let guard = FileLock::acquire(&path, false).unwrap();
        drop(guard);

        let _again = FileLock::acquire(&path, false).unwrap();
    }

    #[test]
    fn with_lock_skips_on_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");

        let _guard = FileLock::acquire(&path, false).unwrap();
        assert_eq!(with_lock(&path, || 1), None);
        drop(_guard);
        assert_eq!(with_lock(&path, || 1), Some(1));
    }

    #[test]
    fn invalid_path_returns_io_error() {
        let path = Path::new("/nonexistent/dir/test.lock");
        let err = FileLock::acquire(path, false).unwrap_err();
        assert!(matches!(err, LockError::Io { .. }), "got {err}");
    }
}
