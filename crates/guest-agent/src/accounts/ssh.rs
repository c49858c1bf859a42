//! Managed-block editing of a user's `authorized_keys`.
//!
//! Not every sshd supports multiple authorized_keys files, so the agent
//! shares the user's own file: every managed entry is preceded by a marker
//! comment, and rewrites replace only those marker-tagged lines. Lines the
//! user added themselves survive verbatim.

use std::path::Path;

use guest_common::atomic::{self, FileOwner};
use tracing::warn;

use crate::error::Result;

/// Comment tagging the lines this agent owns.
pub const MANAGED_COMMENT: &str = "# Added by Google";

/// Rewrite the managed block in `~/.ssh/authorized_keys`.
///
/// Refuses to write through a symlinked `.ssh` directory or keys file —
/// a warning is logged and the user is skipped, so a planted link can never
/// redirect the write.
pub fn update_authorized_keys(home: &Path, owner: FileOwner, keys: &[String]) -> Result<()> {
    let ssh_dir = home.join(".ssh");
    if is_symlink(&ssh_dir) {
        warn!(path = %ssh_dir.display(), "refusing to manage keys through a symlink");
        return Ok(());
    }
    atomic::ensure_dir(&ssh_dir, 0o700, Some(owner))?;

    let keys_file = ssh_dir.join("authorized_keys");
    if is_symlink(&keys_file) {
        warn!(path = %keys_file.display(), "refusing to manage keys through a symlink");
        return Ok(());
    }

    let existing = std::fs::read_to_string(&keys_file).unwrap_or_default();
    let mut lines = without_managed_block(&existing);
    for key in keys {
        lines.push(String::from(MANAGED_COMMENT));
        lines.push(key.clone());
    }
    write_lines(&keys_file, &lines, owner)
}

/// Strip the managed block from an existing keys file, leaving every other
/// line untouched. A missing file is already converged.
pub fn remove_managed_keys(home: &Path, owner: FileOwner) -> Result<()> {
    let keys_file = home.join(".ssh").join("authorized_keys");
    if is_symlink(&keys_file) {
        warn!(path = %keys_file.display(), "refusing to manage keys through a symlink");
        return Ok(());
    }
    let Ok(existing) = std::fs::read_to_string(&keys_file) else {
        return Ok(());
    };
    let lines = without_managed_block(&existing);
    write_lines(&keys_file, &lines, owner)
}

/// All lines except the marker comments and the key line following each.
fn without_managed_block(existing: &str) -> Vec<String> {
    let mut kept = Vec::new();
    let mut skip_next = false;
    for line in existing.lines() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.starts_with(MANAGED_COMMENT) {
            skip_next = true;
            continue;
        }
        kept.push(line.to_string());
    }
    kept
}

fn write_lines(keys_file: &Path, lines: &[String], owner: FileOwner) -> Result<()> {
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    atomic::write_atomic(keys_file, contents.as_bytes(), 0o600, Some(owner))?;
    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn own_uid_gid() -> FileOwner {
        FileOwner {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn keys_path(home: &Path) -> std::path::PathBuf {
        home.join(".ssh").join("authorized_keys")
    }

    #[test]
    fn writes_managed_block_into_fresh_home() {
        let home = tempfile::tempdir().unwrap();
        let keys = vec![String::from("ssh-rsa AAA alice@host")];

        update_authorized_keys(home.path(), own_uid_gid(), &keys).unwrap();

        let written = std::fs::read_to_string(keys_path(home.path())).unwrap();
        assert_eq!(written, "# Added by Google\nssh-rsa AAA alice@host\n");

        let ssh_mode = std::fs::metadata(home.path().join(".ssh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(ssh_mode & 0o777, 0o700);
        let file_mode = std::fs::metadata(keys_path(home.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn preserves_user_lines_and_replaces_managed_ones() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        std::fs::write(
            keys_path(home.path()),
            "ssh-rsa MANUAL user@laptop\n# Added by Google\nssh-rsa OLD\n",
        )
        .unwrap();

        update_authorized_keys(home.path(), own_uid_gid(), &[String::from("ssh-rsa NEW")])
            .unwrap();

        let written = std::fs::read_to_string(keys_path(home.path())).unwrap();
        assert_eq!(
            written,
            "ssh-rsa MANUAL user@laptop\n# Added by Google\nssh-rsa NEW\n"
        );
    }

    #[test]
    fn remove_strips_only_the_managed_block() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        std::fs::write(
            keys_path(home.path()),
            "# Added by Google\nssh-rsa MANAGED\nssh-rsa MANUAL user@laptop\n",
        )
        .unwrap();

        remove_managed_keys(home.path(), own_uid_gid()).unwrap();

        let written = std::fs::read_to_string(keys_path(home.path())).unwrap();
        assert_eq!(written, "ssh-rsa MANUAL user@laptop\n");
    }

    #[test]
    fn remove_with_no_keys_file_is_a_noop() {
        let home = tempfile::tempdir().unwrap();
        remove_managed_keys(home.path(), own_uid_gid()).unwrap();
        assert!(!keys_path(home.path()).exists());
    }

    #[test]
    fn refuses_symlinked_ssh_dir() {
        let home = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), home.path().join(".ssh")).unwrap();

        update_authorized_keys(home.path(), own_uid_gid(), &[String::from("ssh-rsa A")])
            .unwrap();

        // Nothing was written through the link.
        assert!(!elsewhere.path().join("authorized_keys").exists());
    }

    #[test]
    fn refuses_symlinked_keys_file() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        let target = home.path().join("target");
        std::fs::write(&target, "sensitive\n").unwrap();
        std::os::unix::fs::symlink(&target, keys_path(home.path())).unwrap();

        update_authorized_keys(home.path(), own_uid_gid(), &[String::from("ssh-rsa A")])
            .unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "sensitive\n");
    }

    #[test]
    fn multiple_managed_keys_each_get_a_marker() {
        let home = tempfile::tempdir().unwrap();
        let keys = vec![String::from("ssh-rsa ONE"), String::from("ssh-rsa TWO")];

        update_authorized_keys(home.path(), own_uid_gid(), &keys).unwrap();

        let written = std::fs::read_to_string(keys_path(home.path())).unwrap();
        assert_eq!(
            written,
            "# Added by Google\nssh-rsa ONE\n# Added by Google\nssh-rsa TWO\n"
        );
    }
}
