//! Shared filesystem primitives for the guest daemons.
//!
//! Everything here is crash-safe by construction: file contents are staged
//! into a same-directory temp file and renamed into place, and locks are
//! RAII flock guards that release on every exit path.

pub mod atomic;
pub mod lock;
pub mod record;
