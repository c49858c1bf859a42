//! Long-poll client for the instance metadata service.
//!
//! The service holds a GET open until the watched subtree changes (tracked
//! by an opaque etag) or a server-side timeout elapses. [`MetadataClient::watch`]
//! turns that into a push-style stream of deserialized snapshots without a
//! persistent connection, and keeps retrying through service restarts and
//! live migrations.

mod client;
mod error;
pub mod snapshot;

pub use client::{DEFAULT_METADATA_URL, DEFAULT_WAIT_SECS, MetadataClient, MetadataHandler};
pub use error::{MetadataError, Result};
