//! Offline-first sync core for a location-tagged landmark catalog.
//!
//! The local SQLite store is the source of truth for reads. Mutations that
//! cannot reach the remote service are recorded in a durable operation queue
//! and replayed later; refreshes reconcile the store against the remote list.

pub mod config;
pub mod db;
pub mod geo;
pub mod logging;
pub mod model;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, share, DbError, SharedConnection};
pub use geo::{distance_km, filter_by_distance};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::landmark::{Coordinates, Landmark, LandmarkDraft, LandmarkId, LocalKey};
pub use model::operation::{OperationKind, OperationStatus, QueuedOperation, MAX_RETRY_COUNT};
pub use model::session::SessionContext;
pub use queue::{DrainReport, OperationQueue, QueueCounts, QueueError};
pub use reconcile::{ProtectedSet, ReconcileOutcome, Reconciler};
pub use remote::{AuthRemote, LandmarkRemote, LandmarkWrite, RemoteError, RemoteResult};
pub use repo::{RepoError, RepoResult};
pub use service::landmark_service::{
    LandmarkService, LandmarkState, MutationOutcome, RefreshOutcome, RefreshReport,
    RemoteOutcome, ServiceError, ServiceSettings,
};
pub use service::session_service::{SessionError, SessionService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
