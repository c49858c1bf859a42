//! Atomic file replacement with permission and SELinux restoration.
//!
//! Contents are staged into a temp file in the target's own directory so the
//! final rename stays on one filesystem; a reader never observes a partially
//! written file. A process killed mid-stage can leave a stray temp file
//! behind — those carry [`TEMP_PREFIX`] and are ignored by every reader.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{Gid, Uid, chown};
use tracing::debug;

/// Prefix of staging files created next to the target.
pub const TEMP_PREFIX: &str = ".guest-agent-";

/// Owner applied to a written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Error from an atomic write. Always recoverable: callers log it and skip
/// the item, leaving the previous file contents intact.
#[derive(Debug, thiserror::Error)]
#[error("{}: {detail}", path.display())]
pub struct WriteError {
    pub path: PathBuf,
    pub detail: String,
}

impl WriteError {
    pub(crate) fn new(path: &Path, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Replace `path` with `contents` in one rename.
///
/// The target keeps its old contents on any failure before the rename.
/// After the rename the file mode is set, ownership is applied when given,
/// and the SELinux label is restored best-effort.
pub fn write_atomic(
    path: &Path,
    contents: &[u8],
    mode: u32,
    owner: Option<FileOwner>,
) -> Result<(), WriteError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| WriteError::new(path, "no parent directory"))?;

    let mut staged = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| WriteError::new(path, format!("stage: {e}")))?;
    staged
        .as_file_mut()
        .write_all(contents)
        .map_err(|e| WriteError::new(path, format!("stage: {e}")))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| WriteError::new(path, format!("sync: {e}")))?;
    staged
        .persist(path)
        .map_err(|e| WriteError::new(path, format!("replace: {}", e.error)))?;

    set_permissions(path, mode, owner)?;
    restore_selinux_context(path);
    Ok(())
}

/// Create `path` as a directory if missing and apply mode and ownership.
pub fn ensure_dir(path: &Path, mode: u32, owner: Option<FileOwner>) -> Result<(), WriteError> {
    if !path.exists() {
        std::fs::create_dir(path).map_err(|e| WriteError::new(path, format!("mkdir: {e}")))?;
    }
    set_permissions(path, mode, owner)?;
    restore_selinux_context(path);
    Ok(())
}

fn set_permissions(path: &Path, mode: u32, owner: Option<FileOwner>) -> Result<(), WriteError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| WriteError::new(path, format!("chmod: {e}")))?;
    if let Some(owner) = owner {
        chown(
            path,
            Some(Uid::from_raw(owner.uid)),
            Some(Gid::from_raw(owner.gid)),
        )
        .map_err(|e| WriteError::new(path, format!("chown: {e}")))?;
    }
    Ok(())
}

/// Restore the SELinux label as policy specifies. Only some hosts run
/// SELinux, so a missing restorecon is a no-op, not an error.
fn restore_selinux_context(path: &Path) {
    let Ok(restorecon) = which::which("restorecon") else {
        return;
    };
    match Command::new(restorecon).arg(path).output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(path = %path.display(), stderr = %stderr.trim(), "restorecon failed");
        }
        Err(e) => debug!(path = %path.display(), error = %e, "could not run restorecon"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_uid_gid() -> FileOwner {
        FileOwner {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    #[test]
    fn write_creates_file_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");

        write_atomic(&path, b"hello\n", 0o600, None).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn write_replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new", 0o644, Some(own_uid_gid())).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn failed_stage_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // The parent of the target is a plain file, so staging can never
        // succeed and the (nonexistent) target must stay nonexistent.
        let not_a_dir = dir.path().join("file");
        std::fs::write(&not_a_dir, "plain").unwrap();
        let path = not_a_dir.join("target");

        let err = write_atomic(&path, b"data", 0o600, None).unwrap_err();

        assert!(err.detail.starts_with("stage:"), "detail: {}", err.detail);
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(&not_a_dir).unwrap(), "plain");
    }

    #[test]
    fn stray_staging_file_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        std::fs::write(&path, "before").unwrap();

        // A crash between stage and rename leaves a partial temp file; the
        // target is untouched and the next write still succeeds.
        let stray = dir.path().join(format!("{TEMP_PREFIX}partial"));
        std::fs::write(&stray, "par").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "before");

        write_atomic(&path, b"after", 0o600, None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after");
        assert!(stray.exists());
    }

    #[test]
    fn missing_parent_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("target");

        assert!(write_atomic(&path, b"data", 0o600, None).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn ensure_dir_creates_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh");

        ensure_dir(&path, 0o700, Some(own_uid_gid())).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);

        // Idempotent on an existing directory.
        ensure_dir(&path, 0o700, None).unwrap();
    }
}
