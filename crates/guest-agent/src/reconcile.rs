//! The generic watch→diff→apply pass shared by the concrete daemons.

use std::collections::BTreeSet;
use std::fmt::Display;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;

/// One reconcilable domain: how to read desired and actual state, and how
/// to apply a single add or remove.
#[async_trait]
pub trait Reconciler: Send {
    type Item: Clone + Ord + Display + Send + Sync;

    /// Short name used in log lines.
    fn name(&self) -> String;

    /// Identifiers that should exist, derived from the snapshot.
    fn desired(&mut self, snapshot: &Value) -> BTreeSet<Self::Item>;

    /// Identifiers currently configured on the host.
    async fn actual(&mut self) -> BTreeSet<Self::Item>;

    async fn add(&mut self, item: &Self::Item) -> Result<()>;

    async fn remove(&mut self, item: &Self::Item) -> Result<()>;

    /// Persist the set this pass converged on. Runs after every pass that
    /// attempted changes, regardless of per-item failures.
    async fn persist(&mut self, desired: &BTreeSet<Self::Item>) {
        let _ = desired;
    }
}

/// Sorted add/remove lists between two identifier sets. Duplicates never
/// appear: both inputs are sets and set difference preserves that.
pub fn diff<T: Clone + Ord>(desired: &BTreeSet<T>, actual: &BTreeSet<T>) -> (Vec<T>, Vec<T>) {
    let to_add = desired.difference(actual).cloned().collect();
    let to_remove = actual.difference(desired).cloned().collect();
    (to_add, to_remove)
}

/// Run one reconciliation pass.
///
/// Item failures are isolated: the pass always finishes and persists, so a
/// single bad entry cannot block the rest of the snapshot. Adds run before
/// removes. A no-op pass logs nothing at info level.
pub async fn run_pass<R: Reconciler>(reconciler: &mut R, snapshot: &Value) {
    let desired = reconciler.desired(snapshot);
    let actual = reconciler.actual().await;
    let (to_add, to_remove) = diff(&desired, &actual);
    if to_add.is_empty() && to_remove.is_empty() {
        return;
    }

    info!(
        pass = %reconciler.name(),
        actual = %join(&actual),
        desired = %join(&desired),
        to_add = %join(&to_add),
        to_remove = %join(&to_remove),
        "reconciling"
    );

    for item in &to_add {
        if let Err(e) = reconciler.add(item).await {
            warn!(pass = %reconciler.name(), item = %item, error = %e, "could not add");
        }
    }
    for item in &to_remove {
        if let Err(e) = reconciler.remove(item).await {
            warn!(pass = %reconciler.name(), item = %item, error = %e, "could not remove");
        }
    }

    reconciler.persist(&desired).await;
}

fn join<'a, T: Display + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    items
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
