//! User-account reconciliation driven by SSH-key metadata.

pub mod keys;
mod oslogin;
pub mod ssh;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use guest_common::atomic::{self, FileOwner};
use guest_common::lock::{FileLock, with_lock};
use guest_common::record;
use metadata_client::{MetadataHandler, snapshot};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AccountsConfig;
use crate::error::{AgentError, Result};
use crate::hostops::HostOps;
use crate::reconcile::{self, Reconciler};

/// Reconciles local user accounts and their SSH keys against metadata.
pub struct AccountsReconciler {
    config: AccountsConfig,
    ops: Arc<dyn HostOps>,
    oslogin: oslogin::OsLogin,
    /// Groups applied to provisioned users: the configured list plus the
    /// sudoers group, filtered at startup to groups that exist.
    groups: Vec<String>,
    /// Key sets as last applied, per user. A user whose pending keys differ
    /// from this is re-added, so key rotation converges.
    applied_keys: HashMap<String, Vec<String>>,
    /// Users whose provisioning failed; skipped until they leave metadata.
    invalid: HashSet<String>,
    /// Per-user keys extracted from the snapshot being reconciled.
    pending: BTreeMap<String, Vec<String>>,
}

impl AccountsReconciler {
    pub fn new(config: AccountsConfig, ops: Arc<dyn HostOps>) -> Self {
        let oslogin = oslogin::OsLogin::new(config.oslogin_control.clone());
        Self {
            config,
            ops,
            oslogin,
            groups: Vec::new(),
            applied_keys: HashMap::new(),
            invalid: HashSet::new(),
            pending: BTreeMap::new(),
        }
    }

    /// One-time startup work: ensure the sudoers group and its drop-in
    /// exist, and resolve the group list applied to new users.
    pub async fn setup(&mut self) {
        if !self.ops.group_exists(&self.config.sudoers_group) {
            let created = self.ops.create_group(&self.config.sudoers_group).await;
            if let Err(e) = created {
                warn!(error = %e, "could not create the sudoers group");
            }
        }

        if !self.config.sudoers_file.exists() {
            let entry = format!("%{} ALL=(ALL:ALL) NOPASSWD:ALL\n", self.config.sudoers_group);
            let written = with_lock(&self.config.sudoers_lock_file, || {
                atomic::write_atomic(&self.config.sudoers_file, entry.as_bytes(), 0o440, None)
            });
            if let Some(Err(e)) = written {
                warn!(error = %e, "could not write the sudoers drop-in");
            }
        }

        let mut groups: Vec<String> = self.config.groups.clone();
        groups.push(self.config.sudoers_group.clone());
        groups.dedup();
        groups.retain(|group| {
            let exists = self.ops.group_exists(group);
            if !exists {
                debug!(group, "skipping group that does not exist");
            }
            exists
        });
        self.groups = groups;
    }

    /// Provision or refresh one user account.
    async fn provision(&mut self, user: &str, user_keys: &[String]) -> Result<()> {
        if !keys::valid_username(user) {
            return Err(AgentError::Invalid(format!(
                "invalid user account name {user}"
            )));
        }

        if self.ops.lookup_user(user).is_none() {
            info!(user, "creating a new user account");
            self.ops.create_user(user).await?;
            self.set_groups_locked(user).await?;
        }
        let Some(entry) = self.ops.lookup_user(user) else {
            return Err(AgentError::Invalid(format!(
                "user {user} missing after creation"
            )));
        };

        // Accounts with logins disabled keep their sudoers bookkeeping, but
        // their home directories are never written to.
        if entry.shell.file_name().and_then(|s| s.to_str()) == Some("nologin") {
            debug!(user, "login shell is nologin, not managing ssh keys");
            return Ok(());
        }

        ssh::update_authorized_keys(
            &entry.home,
            FileOwner {
                uid: entry.uid,
                gid: entry.gid,
            },
            user_keys,
        )
    }

    /// Apply the configured group set under the sudoers lock, so concurrent
    /// membership edits from different passes never interleave.
    async fn set_groups_locked(&self, user: &str) -> Result<()> {
        let _guard = self.lock_sudoers().await?;
        self.ops.set_user_groups(user, &self.groups).await?;
        Ok(())
    }

    async fn lock_sudoers(&self) -> Result<FileLock> {
        let path = self.config.sudoers_lock_file.clone();
        tokio::task::spawn_blocking(move || FileLock::acquire(&path, true))
            .await
            .map_err(|e| AgentError::Invalid(format!("lock task: {e}")))?
            .map_err(Into::into)
    }
}

#[async_trait]
impl MetadataHandler for AccountsReconciler {
    async fn handle(
        &mut self,
        snapshot_value: &Value,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!("checking for changes to user accounts");
        let oslogin_enabled = snapshot::bool_attribute(snapshot_value, "enable-oslogin");
        self.oslogin.update(oslogin_enabled).await;

        // With OS Login active, metadata keys manage nothing here and every
        // previously configured user is deprovisioned.
        self.pending = if oslogin_enabled {
            BTreeMap::new()
        } else {
            keys::desired_accounts(snapshot_value, Utc::now())
        };

        reconcile::run_pass(self, snapshot_value).await;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for AccountsReconciler {
    type Item = String;

    fn name(&self) -> String {
        String::from("accounts")
    }

    fn desired(&mut self, _snapshot: &Value) -> BTreeSet<String> {
        self.pending.keys().cloned().collect()
    }

    async fn actual(&mut self) -> BTreeSet<String> {
        // The record, not OS presence: a pre-existing local account must
        // never be treated as agent-managed. A recorded user only counts
        // while the keys applied for it match the pending set, so a key
        // rotation surfaces as an add.
        record::read(&self.config.users_file)
            .into_iter()
            .filter(|user| match self.pending.get(user) {
                Some(user_keys) => self.applied_keys.get(user) == Some(user_keys),
                None => true,
            })
            .collect()
    }

    async fn add(&mut self, user: &String) -> Result<()> {
        if self.invalid.contains(user) {
            debug!(user, "skipping user that previously failed provisioning");
            return Ok(());
        }
        let user_keys = self.pending.get(user).cloned().unwrap_or_default();
        match self.provision(user, &user_keys).await {
            Ok(()) => {
                self.applied_keys.insert(user.clone(), user_keys);
                Ok(())
            }
            Err(e) => {
                self.invalid.insert(user.clone());
                Err(e)
            }
        }
    }

    async fn remove(&mut self, user: &String) -> Result<()> {
        info!(user, "deprovisioning user");
        if self.config.remove {
            let removed = self.ops.remove_user(user).await;
            if let Err(e) = removed {
                warn!(user, error = %e, "could not remove user account");
            }
        }

        // The managed key block and the sudoers membership go away even
        // when the account itself is retained.
        if let Some(entry) = self.ops.lookup_user(user) {
            let owner = FileOwner {
                uid: entry.uid,
                gid: entry.gid,
            };
            if let Err(e) = ssh::remove_managed_keys(&entry.home, owner) {
                warn!(user, error = %e, "could not remove managed ssh keys");
            }
            match self.lock_sudoers().await {
                Ok(_guard) => {
                    if let Err(e) = self
                        .ops
                        .remove_user_from_group(user, &self.config.sudoers_group)
                        .await
                    {
                        warn!(user, error = %e, "could not remove sudoers membership");
                    }
                }
                Err(e) => warn!(user, error = %e, "could not lock sudoers for removal"),
            }
        }

        self.applied_keys.remove(user);
        self.invalid.remove(user);
        Ok(())
    }

    async fn persist(&mut self, desired: &BTreeSet<String>) {
        if let Err(e) = record::write(&self.config.users_file, desired, None) {
            warn!(error = %e, "could not persist the configured-users record");
        }
    }
}
