//! Domain model for the landmark catalog and its offline operation log.
//!
//! # Responsibility
//! - Define validated landmark records and queued mutation entries.
//! - Own the JSON wire codec for both entity types.
//!
//! # Invariants
//! - A `Landmark` can never hold out-of-range coordinates.
//! - Every landmark carries a stable client-side `LocalKey`, independent of
//!   the server-assigned identity.

pub mod landmark;
pub mod operation;
pub mod session;
pub mod wire;

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
