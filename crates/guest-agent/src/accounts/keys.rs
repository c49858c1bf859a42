//! Parsing of SSH-key metadata attributes into a per-user key map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use metadata_client::snapshot;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Timestamp format inside a `google-ssh` key comment.
const EXPIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Portable-filename username: `[A-Za-z0-9._]` first, `[A-Za-z0-9._-]`
/// after, so a name can never start with `-` and reach a command line as a
/// flag.
pub fn valid_username(user: &str) -> bool {
    let mut chars = user.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphanumeric() || matches!(first, '.' | '_'))
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// True when the key's structured comment carries an expiry in the past.
///
/// Keys look like `<type> <blob> google-ssh {"userName":…,"expireOn":…}`.
/// Any malformed comment means "not expiring" — bad data must never lock a
/// key out (fail open, not closed).
pub fn key_expired(key: &str, now: DateTime<Utc>) -> bool {
    let Some((schema, comment)) = schema_and_comment(key) else {
        return false;
    };
    if schema != "google-ssh" {
        return false;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(comment.trim()) else {
        debug!("invalid JSON in google-ssh comment; not expiring key");
        return false;
    };
    let Some(expire) = parsed.get("expireOn").and_then(Value::as_str) else {
        return false;
    };
    match DateTime::parse_from_str(expire, EXPIRE_FORMAT) {
        Ok(expire_time) => now > expire_time.with_timezone(&Utc),
        Err(_) => {
            warn!(expire, "expiration timestamp not understood; not expiring key");
            false
        }
    }
}

/// The third whitespace-separated field and everything after it.
fn schema_and_comment(key: &str) -> Option<(&str, &str)> {
    let (_kind, rest) = split_word(key)?;
    let (_blob, rest) = split_word(rest)?;
    let (schema, rest) = split_word(rest)?;
    Some((schema, rest))
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(boundary) => Some(s.split_at(boundary)),
        None => Some((s, "")),
    }
}

/// Parse newline-delimited `user:key` data into a user-to-keys map.
///
/// A malformed line is skipped with a log entry; it never poisons the rest
/// of the batch.
pub fn parse_accounts(data: &str, now: DateTime<Utc>) -> BTreeMap<String, Vec<String>> {
    let mut users: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in data.lines().filter(|line| !line.is_empty()) {
        if !line.is_ascii() {
            info!(line, "ssh key contains a non-ascii character, skipping");
            continue;
        }
        let Some((user, key)) = line.split_once(':') else {
            info!(line, "ssh key is not a complete user:key entry, skipping");
            continue;
        };
        if user.is_empty() {
            info!(line, "ssh key entry has no user, skipping");
            continue;
        }
        if key_expired(key, now) {
            debug!(user, "expired ssh key, skipping");
            continue;
        }
        users.entry(user.to_string()).or_default().push(key.to_string());
    }
    users
}

/// Desired accounts from a full metadata snapshot.
///
/// Instance keys win over project keys. The project fallback is suppressed
/// either by `block-project-ssh-keys=true` or by a legacy instance-level
/// `sshKeys` value.
pub fn desired_accounts(snapshot_value: &Value, now: DateTime<Utc>) -> BTreeMap<String, Vec<String>> {
    let instance_legacy =
        snapshot::instance_attribute(snapshot_value, "sshKeys").filter(|v| !v.is_empty());
    let block_project = snapshot::instance_attribute(snapshot_value, "block-project-ssh-keys")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let mut sources: Vec<&str> = Vec::new();
    sources.extend(instance_legacy);
    sources.extend(snapshot::instance_attribute(snapshot_value, "ssh-keys"));
    if !block_project && instance_legacy.is_none() {
        sources.extend(snapshot::project_attribute(snapshot_value, "ssh-keys"));
        sources.extend(snapshot::project_attribute(snapshot_value, "sshKeys"));
    }

    let data = sources
        .into_iter()
        .filter(|source| !source.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    parse_accounts(&data, now)
}
