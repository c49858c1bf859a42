//! OS Login activation toggle.
//!
//! When OS Login is enabled in metadata, account and key management are
//! delegated to the host's OS Login stack; this module only flips that
//! stack on or off through its control tool.

use tracing::{info, warn};

use crate::command;

pub struct OsLogin {
    control: String,
    /// Last state applied, so an unchanged snapshot runs no commands.
    active: Option<bool>,
    missing_warned: bool,
}

impl OsLogin {
    pub fn new(control: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            active: None,
            missing_warned: false,
        }
    }

    /// Converge the host's OS Login state. A missing control tool is a
    /// one-time warning, not an error.
    pub async fn update(&mut self, enable: bool) {
        if self.active == Some(enable) {
            return;
        }
        if which::which(&self.control).is_err() {
            if !self.missing_warned {
                warn!(tool = %self.control, "OS Login control tool not installed");
                self.missing_warned = true;
            }
            return;
        }
        self.missing_warned = false;

        let action = if enable { "activate" } else { "deactivate" };
        match command::exec(&self.control, &[action]).await {
            Ok(_) => {
                info!(action, "updated OS Login");
                self.active = Some(enable);
            }
            Err(e) => warn!(action, error = %e, "could not update OS Login"),
        }
    }
}
