//! Host capability interface hiding distro-specific commands.
//!
//! The reconcilers talk to one [`HostOps`] implementation selected at
//! startup and never branch on distro themselves. Integration tests supply
//! an in-memory implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{self, CommandError};
use crate::config::CommandTemplates;

/// A local OS user entry.
#[derive(Debug, Clone)]
pub struct OsUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Operations the reconcilers need from the host OS.
#[async_trait]
pub trait HostOps: Send + Sync {
    fn lookup_user(&self, name: &str) -> Option<OsUser>;
    fn group_exists(&self, name: &str) -> bool;
    async fn create_user(&self, name: &str) -> Result<(), CommandError>;
    async fn remove_user(&self, name: &str) -> Result<(), CommandError>;
    /// Replace the user's supplementary groups.
    async fn set_user_groups(&self, name: &str, groups: &[String]) -> Result<(), CommandError>;
    async fn remove_user_from_group(&self, name: &str, group: &str) -> Result<(), CommandError>;
    async fn create_group(&self, name: &str) -> Result<(), CommandError>;
    /// Bring up the given ethernet interfaces.
    async fn enable_interfaces(&self, interfaces: &[String]) -> Result<(), CommandError>;
    /// Sync the system clock from the hardware clock.
    async fn sync_clock(&self) -> Result<(), CommandError>;
}

/// Expand a command template into argv words.
fn render(template: &str, vars: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|word| {
            let mut word = word.to_string();
            for (name, value) in vars {
                word = word.replace(&format!("{{{name}}}"), value);
            }
            word
        })
        .collect()
}

/// Command-template-driven [`HostOps`] for Linux hosts.
pub struct LinuxHostOps {
    templates: CommandTemplates,
}

impl LinuxHostOps {
    pub fn new(templates: CommandTemplates) -> Self {
        Self { templates }
    }

    /// First interface-activation client present on this host.
    fn detect_dhcp_client() -> Option<&'static str> {
        ["dhclient", "wicked", "dhcpcd"]
            .into_iter()
            .find(|client| which::which(client).is_ok())
    }
}

#[async_trait]
impl HostOps for LinuxHostOps {
    fn lookup_user(&self, name: &str) -> Option<OsUser> {
        let entry = nix::unistd::User::from_name(name).ok().flatten()?;
        Some(OsUser {
            name: entry.name,
            uid: entry.uid.as_raw(),
            gid: entry.gid.as_raw(),
            home: entry.dir,
            shell: entry.shell,
        })
    }

    fn group_exists(&self, name: &str) -> bool {
        nix::unistd::Group::from_name(name).ok().flatten().is_some()
    }

    async fn create_user(&self, name: &str) -> Result<(), CommandError> {
        let line = render(&self.templates.useradd, &[("user", name)]);
        command::exec_line(&line).await.map(|_| ())
    }

    async fn remove_user(&self, name: &str) -> Result<(), CommandError> {
        let line = render(&self.templates.userdel, &[("user", name)]);
        command::exec_line(&line).await.map(|_| ())
    }

    async fn set_user_groups(&self, name: &str, groups: &[String]) -> Result<(), CommandError> {
        let joined = groups.join(",");
        let line = render(
            &self.templates.usermod,
            &[("user", name), ("groups", joined.as_str())],
        );
        command::exec_line(&line).await.map(|_| ())
    }

    async fn remove_user_from_group(&self, name: &str, group: &str) -> Result<(), CommandError> {
        let line = render(
            &self.templates.gpasswd_remove,
            &[("user", name), ("group", group)],
        );
        command::exec_line(&line).await.map(|_| ())
    }

    async fn create_group(&self, name: &str) -> Result<(), CommandError> {
        let line = render(&self.templates.groupadd, &[("group", name)]);
        command::exec_line(&line).await.map(|_| ())
    }

    async fn enable_interfaces(&self, interfaces: &[String]) -> Result<(), CommandError> {
        if !self.templates.dhcp.is_empty() {
            let line = render(&self.templates.dhcp, &[]);
            return command::exec_line(&line).await.map(|_| ());
        }
        let Some(client) = Self::detect_dhcp_client() else {
            return Err(CommandError {
                command: String::from("dhcp"),
                detail: String::from("no DHCP client found on this host"),
            });
        };
        debug!(client, "enabling interfaces");
        let names: Vec<&str> = interfaces.iter().map(String::as_str).collect();
        match client {
            "wicked" => {
                let mut args = vec!["ifup"];
                args.extend(&names);
                command::exec(client, &args).await.map(|_| ())
            }
            "dhcpcd" => {
                // dhcpcd activates one interface per invocation.
                for name in names {
                    command::exec(client, &[name]).await?;
                }
                Ok(())
            }
            _ => command::exec(client, &names).await.map(|_| ()),
        }
    }

    async fn sync_clock(&self) -> Result<(), CommandError> {
        let line = render(&self.templates.clock_sync, &[]);
        command::exec_line(&line).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_expands_placeholders() {
        let line = render("useradd -m -s /bin/bash -p * {user}", &[("user", "alice")]);
        assert_eq!(
            line,
            vec!["useradd", "-m", "-s", "/bin/bash", "-p", "*", "alice"]
        );
    }

    #[test]
    fn render_expands_multiple_vars() {
        let line = render(
            "usermod -G {groups} {user}",
            &[("user", "bob"), ("groups", "adm,google-sudoers")],
        );
        assert_eq!(line, vec!["usermod", "-G", "adm,google-sudoers", "bob"]);
    }

    #[test]
    fn render_without_vars_is_plain_split() {
        assert_eq!(render("hwclock --hctosys", &[]), vec!["hwclock", "--hctosys"]);
    }

    #[test]
    fn lookup_root_user() {
        let ops = LinuxHostOps::new(CommandTemplates::default());
        let root = ops.lookup_user("root").unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.home, PathBuf::from("/root"));
        assert!(ops.lookup_user("no-such-user-here").is_none());
    }
}
