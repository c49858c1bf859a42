//! The long-poll metadata client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{MetadataError, Result};

/// Base URL of the metadata service.
pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Default server-side hold time for a long-poll request, in seconds.
pub const DEFAULT_WAIT_SECS: u64 = 60;

/// Pause before retrying an unavailable or unreachable server.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Callback invoked once per delivered snapshot.
///
/// An error return is logged by the watch loop and watching continues; one
/// failed reconciliation pass must never take the daemon down.
#[async_trait]
pub trait MetadataHandler: Send {
    async fn handle(
        &mut self,
        snapshot: &Value,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Client for one-shot fetches and change watches against the metadata
/// service. Owns the change token: the etag starts at `"0"` and is replaced
/// only by a successful response carrying a new one.
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
    etag: String,
    wait_secs: u64,
    /// Last transport failure logged, for retry-storm dedup.
    last_failure: Option<String>,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>, wait_secs: u64) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            etag: String::from("0"),
            wait_secs,
            last_failure: None,
        }
    }

    /// The current change token.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// One-shot read of `key`. Non-2xx answers surface as
    /// [`MetadataError::Status`]; transport failures retry internally.
    pub async fn fetch(&mut self, key: &str, recursive: bool) -> Result<Value> {
        self.poll(key, recursive, false).await
    }

    /// Watch `key` and invoke `handler` once per change until `shutdown`
    /// fires.
    ///
    /// A response body identical to the previously delivered one is skipped;
    /// the comparison value starts as `Value::Null`, so a first response
    /// equal to that initial value is skipped as well. Hard HTTP errors are
    /// logged (deduplicated) and the poll is retried; the watch itself only
    /// ends on shutdown.
    pub async fn watch(
        &mut self,
        key: &str,
        recursive: bool,
        handler: &mut dyn MetadataHandler,
        shutdown: &CancellationToken,
    ) {
        let mut delivered = Value::Null;
        let mut last_error: Option<String> = None;
        loop {
            let body = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = self.poll(key, recursive, true) => match result {
                    Ok(body) => {
                        last_error = None;
                        body
                    }
                    Err(e) => {
                        let detail = e.to_string();
                        if last_error.as_deref() != Some(detail.as_str()) {
                            error!(key, error = %detail, "metadata watch request failed");
                            last_error = Some(detail);
                        }
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                        continue;
                    }
                },
            };
            if body == delivered {
                continue;
            }
            delivered = body;
            if let Err(e) = handler.handle(&delivered).await {
                error!(key, error = %e, "handler failed; continuing to watch");
            }
        }
    }

    /// One logical GET: retries 503 and transport errors forever (with
    /// identical-failure log dedup), adopts the response etag, and returns
    /// the deserialized body. Any other non-2xx is returned to the caller.
    async fn poll(&mut self, key: &str, recursive: bool, wait: bool) -> Result<Value> {
        let url = self.url_for(key, recursive);
        // Client-side timeout sits slightly above the server-side hold so a
        // healthy long-poll always completes server-side first.
        let timeout = Duration::from_secs(self.wait_secs + self.wait_secs.div_ceil(10));
        loop {
            let request = self
                .http
                .get(&url)
                .header("Metadata-Flavor", "Google")
                .timeout(timeout)
                .query(&[
                    ("alt", String::from("json")),
                    ("last_etag", self.etag.clone()),
                    ("recursive", recursive.to_string()),
                    ("timeout_sec", self.wait_secs.to_string()),
                    ("wait_for_change", wait.to_string()),
                ]);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let detail = e.to_string();
                    // An unreachable server during live migration retries for
                    // minutes; log each distinct failure once.
                    if self.last_failure.as_deref() != Some(detail.as_str()) {
                        error!(key, error = %detail, "metadata request failed, retrying");
                        self.last_failure = Some(detail);
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                // Service restart; retry with the token unchanged.
                debug!(key, "metadata service unavailable, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            if !status.is_success() {
                return Err(MetadataError::Status { status });
            }

            self.last_failure = None;
            if let Some(etag) = response
                .headers()
                .get("etag")
                .and_then(|value| value.to_str().ok())
            {
                self.etag = etag.to_string();
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| MetadataError::Decode(e.to_string()));
        }
    }

    fn url_for(&self, key: &str, recursive: bool) -> String {
        let key = key.trim_matches('/');
        let mut url = format!("{}/{key}", self.base_url);
        // A recursive read addresses a subtree; the trailing slash matters
        // to the server.
        if recursive && !url.ends_with('/') {
            url.push('/');
        }
        url
    }
}
