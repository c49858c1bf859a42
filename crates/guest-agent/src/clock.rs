//! Clock-skew handling after live migration.
//!
//! The hypervisor rolls the instance's drift token when the hardware clock
//! has been stepped under the guest (live migration, host maintenance).
//! Each token change triggers one clock sync; change detection itself is
//! the metadata client's identical-body suppression.

use std::sync::Arc;

use async_trait::async_trait;
use metadata_client::MetadataHandler;
use serde_json::Value;
use tracing::{info, warn};

use crate::hostops::HostOps;

pub struct ClockSkewHandler {
    ops: Arc<dyn HostOps>,
}

impl ClockSkewHandler {
    pub fn new(ops: Arc<dyn HostOps>) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl MetadataHandler for ClockSkewHandler {
    async fn handle(
        &mut self,
        snapshot_value: &Value,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(token = %snapshot_value, "clock drift token changed");
        match self.ops.sync_clock().await {
            Ok(()) => info!("synced system time with the hardware clock"),
            Err(e) => warn!(error = %e, "failed to sync system time"),
        }
        Ok(())
    }
}
