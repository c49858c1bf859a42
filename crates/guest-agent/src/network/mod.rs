//! Network reconciliation: interface enabling and forwarded-IP routes.

pub mod interfaces;
pub mod routes;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use metadata_client::MetadataHandler;
use serde_json::Value;
use tracing::{info, warn};

use self::routes::RouteTable;
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::hostops::HostOps;
use crate::reconcile::{self, Reconciler};

/// Desired IPs for one local interface, extracted from metadata.
struct InterfaceIps {
    name: String,
    addresses: Vec<String>,
}

/// Watches `instance/network-interfaces` and converges interface activation
/// and per-interface forwarded-IP routes.
pub struct NetworkReconciler {
    config: NetworkConfig,
    ops: Arc<dyn HostOps>,
    routes: Arc<dyn RouteTable>,
    /// MAC-to-name map, built once at daemon start.
    interfaces: HashMap<String, String>,
    /// Interface name set as of the last enable, to skip repeat work.
    enabled: BTreeSet<String>,
}

impl NetworkReconciler {
    pub fn new(config: NetworkConfig, ops: Arc<dyn HostOps>, routes: Arc<dyn RouteTable>) -> Self {
        let interfaces = interfaces::interface_map(&config.sys_net_dir);
        Self {
            config,
            ops,
            routes,
            interfaces,
            enabled: BTreeSet::new(),
        }
    }

    /// Resolve metadata entries to local interfaces and their desired IPs.
    fn extract(&self, snapshot_value: &Value) -> Vec<InterfaceIps> {
        let Some(entries) = snapshot_value.as_array() else {
            warn!("network-interfaces metadata is not a list");
            return Vec::new();
        };
        let mut result = Vec::new();
        for entry in entries {
            let mac = entry.get("mac").and_then(Value::as_str).unwrap_or_default();
            let Some(name) = self.interfaces.get(mac) else {
                warn!(mac, "network interface not found for MAC address");
                continue;
            };
            let mut addresses = string_list(entry.get("forwardedIps"));
            if self.config.ip_aliases {
                addresses.extend(string_list(entry.get("ipAliases")));
            }
            if self.config.target_instance_ips {
                addresses.extend(string_list(entry.get("targetInstanceIps")));
            }
            result.push(InterfaceIps {
                name: name.clone(),
                addresses,
            });
        }
        result
    }

    /// Bring up additional interfaces when the metadata set changes. The
    /// default interface is already up, so a single-interface instance
    /// needs no activation at all.
    async fn enable_interfaces(&mut self, names: &[String]) {
        let current: BTreeSet<String> = names.iter().cloned().collect();
        if current.is_empty() || current == self.enabled {
            return;
        }
        info!(interfaces = ?current, "ethernet interfaces changed");
        self.enabled = current;
        if self.enabled.len() <= 1 {
            return;
        }
        if let Err(e) = self.ops.enable_interfaces(names).await {
            warn!(error = %e, "could not enable ethernet interfaces");
        }
    }
}

#[async_trait]
impl MetadataHandler for NetworkReconciler {
    async fn handle(
        &mut self,
        snapshot_value: &Value,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let extracted = self.extract(snapshot_value);

        if self.config.network_setup {
            let names: Vec<String> = extracted.iter().map(|i| i.name.clone()).collect();
            self.enable_interfaces(&names).await;
        }

        if self.config.ip_forwarding {
            for interface in extracted {
                let mut pass = IpReconciler {
                    routes: Arc::clone(&self.routes),
                    interface: interface.name,
                    desired: routes::parse_forwarded_ips(&interface.addresses)
                        .into_iter()
                        .collect(),
                };
                reconcile::run_pass(&mut pass, snapshot_value).await;
            }
        }
        Ok(())
    }
}

/// Null entries become empty strings so the parser can log them as invalid
/// instead of dropping them silently.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Forwarded-IP routes for one interface.
struct IpReconciler {
    routes: Arc<dyn RouteTable>,
    interface: String,
    desired: BTreeSet<String>,
}

#[async_trait]
impl Reconciler for IpReconciler {
    type Item = String;

    fn name(&self) -> String {
        format!("{} forwarded-ips", self.interface)
    }

    fn desired(&mut self, _snapshot: &Value) -> BTreeSet<String> {
        self.desired.clone()
    }

    async fn actual(&mut self) -> BTreeSet<String> {
        self.routes.list(&self.interface).await.into_iter().collect()
    }

    async fn add(&mut self, address: &String) -> Result<()> {
        self.routes
            .add(address, &self.interface)
            .await
            .map_err(Into::into)
    }

    async fn remove(&mut self, address: &String) -> Result<()> {
        self.routes
            .remove(address, &self.interface)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconciler_with_interfaces(macs: &[(&str, &str)]) -> NetworkReconciler {
        let dir = tempfile::tempdir().unwrap();
        for (mac, name) in macs {
            let iface = dir.path().join(name);
            std::fs::create_dir(&iface).unwrap();
            std::fs::write(iface.join("address"), format!("{mac}\n")).unwrap();
        }
        let config = NetworkConfig {
            sys_net_dir: dir.path().to_path_buf(),
            ..NetworkConfig::default()
        };
        let ops = Arc::new(NullOps);
        let routes = Arc::new(NullRoutes);
        // The tempdir may drop once the map is built.
        NetworkReconciler::new(config, ops, routes)
    }

    struct NullOps;

    #[async_trait]
    impl crate::hostops::HostOps for NullOps {
        fn lookup_user(&self, _name: &str) -> Option<crate::hostops::OsUser> {
            None
        }
        fn group_exists(&self, _name: &str) -> bool {
            false
        }
        async fn create_user(&self, _name: &str) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn remove_user(&self, _name: &str) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn set_user_groups(
            &self,
            _name: &str,
            _groups: &[String],
        ) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn remove_user_from_group(
            &self,
            _name: &str,
            _group: &str,
        ) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn create_group(&self, _name: &str) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn enable_interfaces(
            &self,
            _interfaces: &[String],
        ) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn sync_clock(&self) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
    }

    struct NullRoutes;

    #[async_trait]
    impl RouteTable for NullRoutes {
        async fn list(&self, _interface: &str) -> Vec<String> {
            Vec::new()
        }
        async fn add(
            &self,
            _address: &str,
            _interface: &str,
        ) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
        async fn remove(
            &self,
            _address: &str,
            _interface: &str,
        ) -> std::result::Result<(), crate::command::CommandError> {
            Ok(())
        }
    }

    #[test]
    fn extract_resolves_macs_and_merges_ip_kinds() {
        let reconciler = reconciler_with_interfaces(&[("42:01:0a:00:00:02", "eth0")]);
        let snapshot_value = json!([
            {
                "mac": "42:01:0a:00:00:02",
                "forwardedIps": ["10.0.0.1"],
                "ipAliases": ["192.168.0.0/24"],
                "targetInstanceIps": ["10.0.0.9"],
            },
            {"mac": "ff:ff:ff:ff:ff:ff", "forwardedIps": ["10.9.9.9"]},
        ]);

        let extracted = reconciler.extract(&snapshot_value);

        assert_eq!(extracted.len(), 1);
        let eth0 = extracted.first().unwrap();
        assert_eq!(eth0.name, "eth0");
        assert_eq!(
            eth0.addresses,
            vec!["10.0.0.1", "192.168.0.0/24", "10.0.0.9"]
        );
    }

    #[test]
    fn extract_honors_disabled_ip_kinds() {
        let mut reconciler = reconciler_with_interfaces(&[("42:01:0a:00:00:02", "eth0")]);
        reconciler.config.ip_aliases = false;
        reconciler.config.target_instance_ips = false;
        let snapshot_value = json!([{
            "mac": "42:01:0a:00:00:02",
            "forwardedIps": ["10.0.0.1"],
            "ipAliases": ["192.168.0.0/24"],
            "targetInstanceIps": ["10.0.0.9"],
        }]);

        let extracted = reconciler.extract(&snapshot_value);
        assert_eq!(extracted.first().unwrap().addresses, vec!["10.0.0.1"]);
    }

    #[test]
    fn string_list_preserves_null_entries_as_invalid() {
        let value = json!(["1.1.1.1", null]);
        assert_eq!(string_list(Some(&value)), vec!["1.1.1.1", ""]);
        assert!(string_list(None).is_empty());
    }
}
