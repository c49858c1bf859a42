//! Daemon configuration, passed in as plain values.
//!
//! The core never reads a config file: the binary assembles these structs
//! from CLI flags and environment overrides and hands them down.

use std::path::PathBuf;

pub const ACCOUNTS_LOCK: &str = "/var/lock/google_accounts.lock";
pub const NETWORKING_LOCK: &str = "/var/lock/google_networking.lock";
pub const CLOCK_SKEW_LOCK: &str = "/var/lock/google_clock_skew.lock";

/// Command templates for host mutations. `{user}`, `{group}` and `{groups}`
/// expand at render time; words are split on whitespace before expansion.
#[derive(Debug, Clone)]
pub struct CommandTemplates {
    pub useradd: String,
    pub userdel: String,
    pub usermod: String,
    pub groupadd: String,
    pub gpasswd_remove: String,
    /// Command enabling additional ethernet interfaces. Empty means detect
    /// a DHCP client on the host instead.
    pub dhcp: String,
    pub clock_sync: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            // '*' is recognized as a locked password but, unlike '!', does
            // not make sshd deny key-based login.
            useradd: String::from("useradd -m -s /bin/bash -p * {user}"),
            userdel: String::from("userdel -r {user}"),
            usermod: String::from("usermod -G {groups} {user}"),
            groupadd: String::from("groupadd {group}"),
            gpasswd_remove: String::from("gpasswd -d {user} {group}"),
            dhcp: String::new(),
            clock_sync: String::from("hwclock --hctosys"),
        }
    }
}

/// Accounts daemon configuration.
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    /// Supplementary groups for provisioned users; filtered at startup to
    /// groups that exist on the host.
    pub groups: Vec<String>,
    /// Whether deprovisioning deletes the OS account.
    pub remove: bool,
    pub sudoers_group: String,
    pub sudoers_file: PathBuf,
    /// The configured-users record.
    pub users_file: PathBuf,
    pub lock_file: PathBuf,
    /// Lock serializing sudoers-membership edits across daemons.
    pub sudoers_lock_file: PathBuf,
    /// OS Login control tool, looked up on PATH.
    pub oslogin_control: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            remove: false,
            sudoers_group: String::from("google-sudoers"),
            sudoers_file: PathBuf::from("/etc/sudoers.d/google_sudoers"),
            users_file: PathBuf::from("/var/lib/google/google_users"),
            lock_file: PathBuf::from(ACCOUNTS_LOCK),
            sudoers_lock_file: PathBuf::from("/var/lock/google_sudoers.lock"),
            oslogin_control: String::from("google_oslogin_control"),
        }
    }
}

/// Network daemon configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub ip_forwarding: bool,
    /// Routing protocol identifier tagging agent-managed routes.
    pub proto_id: String,
    pub ip_aliases: bool,
    pub target_instance_ips: bool,
    pub network_setup: bool,
    pub lock_file: PathBuf,
    /// Interface enumeration root, normally `/sys/class/net`.
    pub sys_net_dir: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_forwarding: true,
            proto_id: String::from("66"),
            ip_aliases: true,
            target_instance_ips: true,
            network_setup: true,
            lock_file: PathBuf::from(NETWORKING_LOCK),
            sys_net_dir: PathBuf::from("/sys/class/net"),
        }
    }
}
