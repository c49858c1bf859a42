//! Shared daemon bootstrap: single-instance lock, shutdown wiring, watch.

use std::path::Path;

use guest_common::lock::{FileLock, LockError};
use metadata_client::{MetadataClient, MetadataHandler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Token that fires on SIGTERM or SIGINT. Service stop is the only
/// intentional way a daemon ends.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();
        tokio::select! {
            _ = recv_signal(&mut sigterm) => info!("received SIGTERM, stopping"),
            _ = recv_signal(&mut sigint) => info!("received SIGINT, stopping"),
        }
        signal_token.cancel();
    });
    token
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Long-poll hold time with a per-process offset, so the daemons' polls
/// don't all expire in lockstep against the server.
pub fn jittered_wait(base: u64) -> u64 {
    base + u64::from(std::process::id()) % 30
}

/// Run one daemon: take its exclusive lock, then watch `key` until the
/// shutdown token fires. A second instance of the same daemon type logs
/// and returns cleanly instead of fighting over resources.
pub async fn run(
    name: &str,
    lock_path: &Path,
    client: &mut MetadataClient,
    key: &str,
    recursive: bool,
    handler: &mut dyn MetadataHandler,
    shutdown: &CancellationToken,
) {
    let _lock = match FileLock::acquire(lock_path, false) {
        Ok(lock) => lock,
        Err(LockError::AlreadyLocked { .. }) => {
            warn!(daemon = name, "another instance is already running");
            return;
        }
        Err(e) => {
            warn!(daemon = name, error = %e, "could not take the daemon lock");
            return;
        }
    };

    info!(daemon = name, "starting");
    client.watch(key, recursive, handler, shutdown).await;
    info!(daemon = name, "stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let wait = jittered_wait(60);
        assert!((60..90).contains(&wait));
    }
}
