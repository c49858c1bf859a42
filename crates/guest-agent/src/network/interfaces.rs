//! MAC-address-to-interface-name mapping from sysfs.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

/// Map hardware addresses to interface names by enumerating `base`
/// (normally `/sys/class/net`). Built once at daemon start; metadata refers
/// to interfaces by MAC, the kernel by name.
pub fn interface_map(base: &Path) -> HashMap<String, String> {
    let mut interfaces = HashMap::new();
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %base.display(), error = %e, "could not enumerate network interfaces");
            return interfaces;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        match std::fs::read_to_string(entry.path().join("address")) {
            Ok(mac) => {
                interfaces.insert(mac.trim().to_string(), name);
            }
            Err(e) => {
                warn!(interface = %name, error = %e, "unable to determine MAC address");
            }
        }
    }
    interfaces
}
