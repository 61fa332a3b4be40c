//! Landmark state facade.
//!
//! # Responsibility
//! - Own the observable landmark set, busy flag and error string.
//! - Serve cache-first reads and reconcile against the remote in the
//!   background.
//! - Route mutations to the remote service, falling back to the operation
//!   queue on transient failures.
//!
//! # Invariants
//! - The observable set is only rebuilt from the store, never edited in place.
//! - Mutations, refreshes and drains are serialized by one writer lock.
//! - A mutation for a landmark with live queue entries is queued behind them
//!   and never sent directly.
//! - A permanent remote rejection is still applied locally. It is recorded as
//!   a dead letter and reported to the caller as `ServiceError::Rejected`.

use crate::config::CoreConfig;
use crate::db::{self, SharedConnection};
use crate::geo::filter_by_distance;
use crate::model::landmark::{
    Coordinates, Landmark, LandmarkDraft, LandmarkValidationError, LocalKey,
};
use crate::model::operation::{OperationId, OperationKind, QueuedOperation};
use crate::queue::{DrainReport, OperationQueue, QueueCounts, QueueError};
use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::remote::{with_timeout, LandmarkRemote, LandmarkWrite, RemoteError};
use crate::repo::landmark_repo::{LandmarkRepository, SqliteLandmarkRepository};
use crate::repo::RepoError;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const STORAGE_ERROR_MESSAGE: &str = "Local storage error. Please try again.";

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Facade error for landmark use-cases.
#[derive(Debug)]
pub enum ServiceError {
    Validation(LandmarkValidationError),
    LandmarkNotFound(LocalKey),
    /// The remote service refused the change. It was applied locally and
    /// parked in the dead letters.
    Rejected(RemoteError),
    Queue(QueueError),
    Storage(RepoError),
}

impl ServiceError {
    /// Text suitable for `LandmarkState::error`. Storage details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::LandmarkNotFound(_) => "Landmark not found.".to_string(),
            Self::Rejected(err) => format!("The server rejected the change: {err}"),
            Self::Queue(QueueError::NotDeadLettered(_)) => {
                "Only operations that ran out of retries can be retried or discarded.".to_string()
            }
            Self::Queue(QueueError::Repo(RepoError::OperationNotFound(_))) => {
                "Queued operation not found.".to_string()
            }
            Self::Queue(_) | Self::Storage(_) => STORAGE_ERROR_MESSAGE.to_string(),
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::LandmarkNotFound(key) => write!(f, "landmark not found: {key}"),
            Self::Rejected(err) => write!(f, "remote rejected mutation: {err}"),
            Self::Queue(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Rejected(err) => Some(err),
            Self::Queue(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::LandmarkNotFound(_) => None,
        }
    }
}

impl From<LandmarkValidationError> for ServiceError {
    fn from(value: LandmarkValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<QueueError> for ServiceError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::LandmarkNotFound(key) => Self::LandmarkNotFound(key),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

impl From<db::DbError> for ServiceError {
    fn from(value: db::DbError) -> Self {
        Self::Storage(RepoError::Db(value))
    }
}

/// Observable facade state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkState {
    /// Newest `created_at` first.
    pub landmarks: Vec<Landmark>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// How the remote side of a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The remote service accepted the change.
    Confirmed,
    /// Applied locally and queued for a later drain.
    Queued {
        operation_id: OperationId,
        reason: String,
    },
    /// The record never reached the remote service; handled locally only.
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// Local record after the mutation; for deletes, the removed record.
    pub landmark: Landmark,
    pub remote: RemoteOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Replaced { count: usize },
    Unchanged { count: usize },
    /// Remote unreachable; cached records were kept.
    Stale { error: String },
    /// Nothing could be shown; the error was published.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub outcome: RefreshOutcome,
    /// Present when the refresh fell back to draining the queue.
    pub drain: Option<DrainReport>,
}

/// Tunables for the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub remote_timeout: Duration,
    pub drain_on_refresh_failure: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

impl From<&CoreConfig> for ServiceSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            remote_timeout: config.remote_timeout(),
            drain_on_refresh_failure: config.drain_on_refresh_failure,
        }
    }
}

/// Clears the busy flag when dropped, including when the caller abandons the
/// future mid-flight.
struct BusyGuard<'a> {
    state: &'a watch::Sender<LandmarkState>,
}

impl<'a> BusyGuard<'a> {
    fn start(state: &'a watch::Sender<LandmarkState>) -> Self {
        state.send_modify(|current| current.is_loading = true);
        Self { state }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|current| current.is_loading = false);
    }
}

/// Single-owner facade over the store, queue and reconciler.
pub struct LandmarkService {
    conn: SharedConnection,
    remote: Arc<dyn LandmarkRemote>,
    queue: OperationQueue,
    reconciler: Reconciler,
    settings: ServiceSettings,
    state: watch::Sender<LandmarkState>,
    writer: Mutex<()>,
}

impl LandmarkService {
    /// Builds the facade, recovers interrupted queue entries and publishes the
    /// cached landmark set.
    pub fn new(
        conn: SharedConnection,
        remote: Arc<dyn LandmarkRemote>,
        settings: ServiceSettings,
    ) -> ServiceResult<Self> {
        let queue = OperationQueue::new(conn.clone());
        queue.recover_interrupted()?;
        let reconciler = Reconciler::new(conn.clone(), remote.clone(), settings.remote_timeout);
        let (state, _) = watch::channel(LandmarkState::default());

        let service = Self {
            conn,
            remote,
            queue,
            reconciler,
            settings,
            state,
            writer: Mutex::new(()),
        };
        service.reload()?;
        Ok(service)
    }

    /// Receives every published state change.
    pub fn subscribe(&self) -> watch::Receiver<LandmarkState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> LandmarkState {
        self.state.borrow().clone()
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Re-reads the store and publishes it as the observable set.
    pub fn load_cached(&self) -> ServiceResult<Vec<Landmark>> {
        self.reload().map_err(|err| self.publish_error(err))
    }

    /// Cache-first refresh.
    ///
    /// Publishes the cached set, then reconciles against the remote list. When
    /// the remote is unavailable the cache is kept and an error is published
    /// only if the cache is empty.
    pub async fn refresh(&self) -> RefreshReport {
        let _writer = self.writer.lock().await;
        let _busy = BusyGuard::start(&self.state);
        let started_at = Instant::now();
        info!("event=refresh module=service status=start");

        let cached = match self.reload() {
            Ok(cached) => cached,
            Err(err) => return self.storage_failure("refresh", err),
        };
        let protected = match self.queue.protected_set() {
            Ok(protected) => protected,
            Err(err) => return self.storage_failure("refresh", err.into()),
        };

        match self.reconciler.fetch_and_merge(&protected).await {
            Ok(outcome) => {
                let (count, replaced) = match &outcome {
                    ReconcileOutcome::Replaced(items) => (items.len(), true),
                    ReconcileOutcome::Unchanged(items) => (items.len(), false),
                };
                self.state.send_modify(|state| {
                    state.landmarks = outcome.into_landmarks();
                    state.error = None;
                });
                info!(
                    "event=refresh module=service status=ok duration_ms={} count={} replaced={}",
                    started_at.elapsed().as_millis(),
                    count,
                    replaced
                );
                let outcome = if replaced {
                    RefreshOutcome::Replaced { count }
                } else {
                    RefreshOutcome::Unchanged { count }
                };
                RefreshReport {
                    outcome,
                    drain: None,
                }
            }
            Err(ReconcileError::Remote(err)) => {
                // Draining against an unreachable service only burns retries.
                let drain = if self.settings.drain_on_refresh_failure && !err.is_unreachable() {
                    match self.drain_locked().await {
                        Ok(report) => Some(report),
                        Err(drain_err) => {
                            warn!(
                                "event=refresh module=service status=error error_code=drain_failed error={}",
                                drain_err
                            );
                            None
                        }
                    }
                } else {
                    None
                };

                let message = format!("Unable to load landmarks: {err}");
                let outcome = if cached.is_empty() {
                    self.state
                        .send_modify(|state| state.error = Some(message.clone()));
                    RefreshOutcome::Failed { error: message }
                } else {
                    self.state.send_modify(|state| state.error = None);
                    RefreshOutcome::Stale { error: message }
                };
                warn!(
                    "event=refresh module=service status=error duration_ms={} error_code={} cached={}",
                    started_at.elapsed().as_millis(),
                    err.code(),
                    cached.len()
                );
                RefreshReport { outcome, drain }
            }
            Err(ReconcileError::Storage(err)) => self.storage_failure("refresh", err.into()),
        }
    }

    /// Returns the cached set at once and reconciles on a background task.
    pub fn spawn_refresh(self: &Arc<Self>) -> (Vec<Landmark>, JoinHandle<RefreshReport>) {
        let cached = self.snapshot().landmarks;
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.refresh().await });
        (cached, handle)
    }

    /// Creates a landmark remotely, or locally plus a queued create when the
    /// remote is unreachable.
    pub async fn create_landmark(&self, draft: LandmarkDraft) -> ServiceResult<MutationOutcome> {
        let _writer = self.writer.lock().await;
        let _busy = BusyGuard::start(&self.state);
        let result = self.create_locked(&draft).await;
        self.settle("create", result)
    }

    /// Applies `draft` to the landmark with `local_key`.
    pub async fn update_landmark(
        &self,
        local_key: LocalKey,
        draft: LandmarkDraft,
    ) -> ServiceResult<MutationOutcome> {
        let _writer = self.writer.lock().await;
        let _busy = BusyGuard::start(&self.state);
        let result = self.update_locked(local_key, &draft).await;
        self.settle("update", result)
    }

    pub async fn delete_landmark(&self, local_key: LocalKey) -> ServiceResult<MutationOutcome> {
        let _writer = self.writer.lock().await;
        let _busy = BusyGuard::start(&self.state);
        let result = self.delete_locked(local_key).await;
        self.settle("delete", result)
    }

    /// Replays queued operations and republishes the store.
    pub async fn drain_queue(&self) -> ServiceResult<DrainReport> {
        let _writer = self.writer.lock().await;
        let _busy = BusyGuard::start(&self.state);
        self.drain_locked()
            .await
            .map_err(|err| self.publish_error(err))
    }

    /// Case-insensitive substring search on title and description.
    pub fn search(&self, query: &str) -> ServiceResult<Vec<Landmark>> {
        self.with_landmarks(|repo| repo.search_by_text(query))
    }

    pub fn by_category(&self, category: &str) -> ServiceResult<Vec<Landmark>> {
        self.with_landmarks(|repo| repo.get_by_category(category))
    }

    /// Landmarks of the observable set within `radius_km` of the center.
    pub fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> ServiceResult<Vec<Landmark>> {
        let center = Coordinates::new(latitude, longitude)?;
        Ok(filter_by_distance(
            &self.state.borrow().landmarks,
            center,
            radius_km,
        ))
    }

    pub fn dead_letters(&self) -> ServiceResult<Vec<QueuedOperation>> {
        Ok(self.queue.dead_letters()?)
    }

    /// Gives a dead letter a fresh retry budget; the next drain replays it.
    pub async fn retry_dead_letter(&self, id: OperationId) -> ServiceResult<QueuedOperation> {
        let _writer = self.writer.lock().await;
        self.queue
            .retry_dead_letter(id)
            .map_err(|err| self.publish_error(err.into()))
    }

    /// Drops a dead letter. The next refresh restores the server's version of
    /// its landmark.
    pub async fn discard_dead_letter(&self, id: OperationId) -> ServiceResult<QueuedOperation> {
        let _writer = self.writer.lock().await;
        self.queue
            .discard_dead_letter(id)
            .map_err(|err| self.publish_error(err.into()))
    }

    pub fn purge_completed(&self) -> ServiceResult<usize> {
        Ok(self.queue.purge_completed()?)
    }

    pub fn queue_counts(&self) -> ServiceResult<QueueCounts> {
        Ok(self.queue.counts()?)
    }

    async fn create_locked(&self, draft: &LandmarkDraft) -> ServiceResult<MutationOutcome> {
        let mut landmark = Landmark::from_draft(draft)?;
        let write = LandmarkWrite::from_landmark(&landmark);

        match with_timeout(
            self.settings.remote_timeout,
            self.remote.create_landmark(&write),
        )
        .await
        {
            Ok(server_copy) => {
                landmark.absorb_remote(&server_copy);
                landmark.is_synced = true;
                self.with_landmarks(|repo| repo.insert(&landmark))?;
                Ok(MutationOutcome {
                    landmark,
                    remote: RemoteOutcome::Confirmed,
                })
            }
            Err(err) if err.is_transient() => {
                self.with_landmarks(|repo| repo.insert(&landmark))?;
                let entry = self.queue.enqueue_snapshot(OperationKind::Create, &landmark)?;
                Ok(queued(landmark, entry, err.to_string()))
            }
            Err(err) => {
                self.with_landmarks(|repo| repo.insert(&landmark))?;
                self.queue
                    .enqueue_rejected(OperationKind::Create, &landmark, err.to_string())?;
                Err(ServiceError::Rejected(err))
            }
        }
    }

    async fn update_locked(
        &self,
        local_key: LocalKey,
        draft: &LandmarkDraft,
    ) -> ServiceResult<MutationOutcome> {
        let mut landmark = self.require(local_key)?;
        landmark.apply_draft(draft)?;

        let waiting = self.queue.has_live_entries(local_key)?;
        let Some(id) = landmark.id.filter(|_| !waiting) else {
            // Either queued behind earlier entries, or the create never
            // reached the server and must be replayed as a create.
            let (kind, reason) = if waiting {
                (OperationKind::Update, "waiting for earlier queued operations")
            } else {
                (OperationKind::Create, "landmark has not reached the server yet")
            };
            self.with_landmarks(|repo| repo.update(&landmark))?;
            let entry = self.queue.enqueue_snapshot(kind, &landmark)?;
            return Ok(queued(landmark, entry, reason.to_string()));
        };

        let write = LandmarkWrite::from_landmark(&landmark);
        match with_timeout(
            self.settings.remote_timeout,
            self.remote.update_landmark(id, &write),
        )
        .await
        {
            Ok(server_copy) => {
                landmark.absorb_remote(&server_copy);
                landmark.is_synced = true;
                self.with_landmarks(|repo| repo.update(&landmark))?;
                Ok(MutationOutcome {
                    landmark,
                    remote: RemoteOutcome::Confirmed,
                })
            }
            Err(err) if err.is_transient() => {
                self.with_landmarks(|repo| repo.update(&landmark))?;
                let entry = self.queue.enqueue_snapshot(OperationKind::Update, &landmark)?;
                Ok(queued(landmark, entry, err.to_string()))
            }
            Err(err) => {
                self.with_landmarks(|repo| repo.update(&landmark))?;
                self.queue
                    .enqueue_rejected(OperationKind::Update, &landmark, err.to_string())?;
                Err(ServiceError::Rejected(err))
            }
        }
    }

    async fn delete_locked(&self, local_key: LocalKey) -> ServiceResult<MutationOutcome> {
        let landmark = self.require(local_key)?;
        let waiting = self.queue.has_live_entries(local_key)?;

        let id = match (landmark.id, waiting) {
            (_, true) => {
                let entry = self.queue.enqueue_snapshot(OperationKind::Delete, &landmark)?;
                self.with_landmarks(|repo| repo.delete_by_local_key(local_key))?;
                return Ok(queued(
                    landmark,
                    entry,
                    "waiting for earlier queued operations".to_string(),
                ));
            }
            (None, false) => {
                self.with_landmarks(|repo| repo.delete_by_local_key(local_key))?;
                return Ok(MutationOutcome {
                    landmark,
                    remote: RemoteOutcome::LocalOnly,
                });
            }
            (Some(id), false) => id,
        };

        match with_timeout(
            self.settings.remote_timeout,
            self.remote.delete_landmark(id),
        )
        .await
        {
            Ok(()) | Err(RemoteError::NotFound) => {
                self.with_landmarks(|repo| repo.delete_by_local_key(local_key))?;
                Ok(MutationOutcome {
                    landmark,
                    remote: RemoteOutcome::Confirmed,
                })
            }
            Err(err) if err.is_transient() => {
                let entry = self.queue.enqueue_snapshot(OperationKind::Delete, &landmark)?;
                self.with_landmarks(|repo| repo.delete_by_local_key(local_key))?;
                Ok(queued(landmark, entry, err.to_string()))
            }
            Err(err) => {
                self.queue
                    .enqueue_rejected(OperationKind::Delete, &landmark, err.to_string())?;
                self.with_landmarks(|repo| repo.delete_by_local_key(local_key))?;
                Err(ServiceError::Rejected(err))
            }
        }
    }

    async fn drain_locked(&self) -> ServiceResult<DrainReport> {
        let report = self
            .queue
            .drain(self.remote.as_ref(), self.settings.remote_timeout)
            .await?;
        self.reload()?;
        Ok(report)
    }

    /// Publishes the outcome of a mutation and logs it.
    fn settle(
        &self,
        action: &'static str,
        result: ServiceResult<MutationOutcome>,
    ) -> ServiceResult<MutationOutcome> {
        // Rejected mutations are applied too, so reload on both branches.
        let reloaded = self.reload();
        let result = result.and_then(|outcome| reloaded.map(|_| outcome));
        match result {
            Ok(outcome) => {
                self.state.send_modify(|state| state.error = None);
                let remote = match &outcome.remote {
                    RemoteOutcome::Confirmed => "confirmed",
                    RemoteOutcome::Queued { .. } => "queued",
                    RemoteOutcome::LocalOnly => "local_only",
                };
                info!(
                    "event=landmark_{} module=service status=ok local_key={} remote={}",
                    action, outcome.landmark.local_key, remote
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    "event=landmark_{} module=service status=error error={}",
                    action, err
                );
                Err(self.publish_error(err))
            }
        }
    }

    fn reload(&self) -> ServiceResult<Vec<Landmark>> {
        let landmarks = self.with_landmarks(|repo| repo.get_all())?;
        self.state
            .send_modify(|state| state.landmarks = landmarks.clone());
        Ok(landmarks)
    }

    fn require(&self, local_key: LocalKey) -> ServiceResult<Landmark> {
        self.with_landmarks(|repo| repo.get_by_local_key(local_key))?
            .ok_or(ServiceError::LandmarkNotFound(local_key))
    }

    fn publish_error(&self, err: ServiceError) -> ServiceError {
        let message = err.user_message();
        self.state.send_modify(|state| state.error = Some(message));
        err
    }

    fn storage_failure(&self, action: &'static str, err: ServiceError) -> RefreshReport {
        error!(
            "event={} module=service status=error error_code=storage_failed error={}",
            action, err
        );
        let err = self.publish_error(err);
        RefreshReport {
            outcome: RefreshOutcome::Failed {
                error: err.user_message(),
            },
            drain: None,
        }
    }

    fn with_landmarks<T>(
        &self,
        op: impl FnOnce(&SqliteLandmarkRepository<'_>) -> Result<T, RepoError>,
    ) -> ServiceResult<T> {
        let conn = db::lock(&self.conn)?;
        let repo = SqliteLandmarkRepository::new(&conn);
        Ok(op(&repo)?)
    }
}

fn queued(landmark: Landmark, entry: QueuedOperation, reason: String) -> MutationOutcome {
    MutationOutcome {
        landmark,
        remote: RemoteOutcome::Queued {
            operation_id: entry.id.unwrap_or_default(),
            reason,
        },
    }
}
