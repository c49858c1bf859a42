//! Line-oriented record of identifiers a daemon has applied.
//!
//! OS presence alone cannot tell an agent-managed entity from one that
//! existed before the agent ran, so each daemon persists the set it last
//! converged on and only ever removes members of that set. The record is
//! rewritten atomically and is never partially visible.

use std::collections::BTreeSet;
use std::path::Path;

use crate::atomic::{self, FileOwner, WriteError};

/// Read a record into a set. A missing file is an empty set; duplicates and
/// surrounding whitespace collapse.
pub fn read(path: &Path) -> BTreeSet<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return BTreeSet::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Atomically replace the record with `entries`, one per line with a
/// trailing newline. The parent directory is created if needed.
pub fn write(
    path: &Path,
    entries: &BTreeSet<String>,
    owner: Option<FileOwner>,
) -> Result<(), WriteError> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| WriteError::new(path, format!("mkdir: {e}")))?;
    }
    let mut contents = String::new();
    for entry in entries {
        contents.push_str(entry);
        contents.push('\n');
    }
    atomic::write_atomic(path, contents.as_bytes(), 0o600, owner)
}
