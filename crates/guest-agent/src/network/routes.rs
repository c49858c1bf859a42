//! Policy-route management for forwarded and aliased IPs.
//!
//! Agent-managed routes are local-scope routes in the local table tagged
//! with the agent's routing protocol id. Listing filters on that tag, so
//! removal can only ever touch routes this agent added.

use async_trait::async_trait;
use tracing::warn;

use crate::command::{self, CommandError};

/// Host-scope local routes on one interface, tagged with the agent's
/// protocol id. A trait seam so tests substitute an in-memory table.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Addresses currently routed on `interface` with the agent's tag.
    async fn list(&self, interface: &str) -> Vec<String>;
    async fn add(&self, address: &str, interface: &str) -> Result<(), CommandError>;
    async fn remove(&self, address: &str, interface: &str) -> Result<(), CommandError>;
}

/// Validate candidate addresses: dotted quad, optionally with a `/prefix`.
///
/// A `/32` suffix collapses to the bare address; other prefixes are kept
/// verbatim. Malformed entries are dropped with a warning and never reject
/// the rest of the batch.
pub fn parse_forwarded_ips<S: AsRef<str>>(candidates: &[S]) -> Vec<String> {
    let mut addresses = Vec::new();
    for candidate in candidates {
        let candidate = candidate.as_ref();
        if !candidate.is_empty() && (is_ipv4(candidate) || is_ipv4_alias(candidate)) {
            let bare = candidate.strip_suffix("/32").unwrap_or(candidate);
            addresses.push(bare.to_string());
        } else {
            warn!(address = %candidate, "could not parse IP address");
        }
    }
    addresses
}

/// Re-append `/32` for a plain host address; alias prefixes pass through.
fn qualify(address: &str) -> String {
    if address.contains('/') {
        address.to_string()
    } else {
        format!("{address}/32")
    }
}

fn is_ipv4(s: &str) -> bool {
    let mut octets = 0;
    for part in s.split('.') {
        if part.is_empty() || part.len() > 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        octets += 1;
    }
    octets == 4
}

fn is_ipv4_alias(s: &str) -> bool {
    match s.split_once('/') {
        Some((address, prefix)) => {
            is_ipv4(address)
                && (1..=2).contains(&prefix.len())
                && prefix.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// `ip route` backed implementation.
pub struct IprouteTable {
    proto_id: String,
}

impl IprouteTable {
    pub fn new(proto_id: impl Into<String>) -> Self {
        Self {
            proto_id: proto_id.into(),
        }
    }
}

#[async_trait]
impl RouteTable for IprouteTable {
    async fn list(&self, interface: &str) -> Vec<String> {
        let proto = self.proto_id.as_str();
        let args = [
            "route", "ls", "table", "local", "type", "local", "proto", proto, "scope", "host",
            "dev", interface,
        ];
        match command::exec("ip", &args).await {
            Ok(stdout) => parse_route_output(&stdout),
            Err(e) => {
                warn!(interface, error = %e, "could not list routes");
                Vec::new()
            }
        }
    }

    async fn add(&self, address: &str, interface: &str) -> Result<(), CommandError> {
        let address = qualify(address);
        let proto = self.proto_id.as_str();
        let args = [
            "route", "add", "to", "local", address.as_str(), "proto", proto, "scope", "host",
            "dev", interface,
        ];
        command::exec("ip", &args).await.map(|_| ())
    }

    async fn remove(&self, address: &str, interface: &str) -> Result<(), CommandError> {
        let address = qualify(address);
        let proto = self.proto_id.as_str();
        let args = [
            "route", "delete", "to", "local", address.as_str(), "proto", proto, "scope", "host",
            "dev", interface,
        ];
        command::exec("ip", &args).await.map(|_| ())
    }
}

/// Extract addresses from `ip route ls` output. The listing filters on
/// dev/proto/scope, so lines reduce to `local <address>`.
fn parse_route_output(stdout: &str) -> Vec<String> {
    let words: Vec<&str> = stdout
        .split_whitespace()
        .filter(|word| *word != "local")
        .collect();
    parse_forwarded_ips(&words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_slash32_and_drops_garbage() {
        let input = ["1.1.1.1", "1.1.1.1/32", "1.1.1.1/24", "bad", ""];
        assert_eq!(
            parse_forwarded_ips(&input),
            vec!["1.1.1.1", "1.1.1.1", "1.1.1.1/24"]
        );
    }

    #[test]
    fn parse_rejects_malformed_quads() {
        let input = ["1.1.1", "1.1.1.1.1", "1.1.1.x", "1.1.1.1/", "1.1.1.1/123"];
        assert!(parse_forwarded_ips(&input).is_empty());
    }

    #[test]
    fn qualify_adds_host_prefix_only_when_missing() {
        assert_eq!(qualify("10.0.0.1"), "10.0.0.1/32");
        assert_eq!(qualify("10.0.0.0/24"), "10.0.0.0/24");
    }

    #[test]
    fn route_output_reduces_to_addresses() {
        let stdout = "local 10.0.0.2\nlocal 10.0.0.3\nlocal 192.168.0.0/24";
        assert_eq!(
            parse_route_output(stdout),
            vec!["10.0.0.2", "10.0.0.3", "192.168.0.0/24"]
        );
        assert!(parse_route_output("").is_empty());
    }
}
