//! Durable offline operation queue.
//!
//! # Responsibility
//! - Record mutations that could not reach the remote service.
//! - Drive entries through the status machine with retry bookkeeping.
//! - Expose dead letters, housekeeping and the protected set used by
//!   reconciliation.
//!
//! # Invariants
//! - Every status change is persisted before the next remote call.
//! - Entries for one landmark are drained strictly in enqueue order.
//! - Dead-lettered entries are never picked up by `drain`.

use crate::db::{self, DbError, SharedConnection};
use crate::model::landmark::{Landmark, LandmarkId, LocalKey};
use crate::model::operation::{
    OperationId, OperationKind, OperationStatus, QueuedOperation, TransitionError,
};
use crate::model::wire::landmark_payload;
use crate::reconcile::ProtectedSet;
use crate::repo::operation_repo::{OperationRepository, SqliteOperationRepository};
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod drain;

pub use drain::DrainReport;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug)]
pub enum QueueError {
    Repo(RepoError),
    Transition(TransitionError),
    /// Landmark snapshot could not be serialized into a payload.
    Payload(serde_json::Error),
    /// Only dead-lettered entries can be retried or discarded by hand.
    NotDeadLettered(OperationId),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Payload(err) => write!(f, "failed to encode queue payload: {err}"),
            Self::NotDeadLettered(id) => write!(f, "queued operation {id} is not dead-lettered"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Transition(err) => Some(err),
            Self::Payload(err) => Some(err),
            Self::NotDeadLettered(_) => None,
        }
    }
}

impl From<RepoError> for QueueError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for QueueError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<TransitionError> for QueueError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value)
    }
}

/// Entry counts per status. Dead letters are counted separately from
/// retry-eligible failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed_retryable: u64,
    pub dead_lettered: u64,
    pub completed: u64,
}

impl QueueCounts {
    /// Entries still expected to reach the remote service.
    pub fn live(&self) -> u64 {
        self.pending + self.processing + self.failed_retryable
    }
}

/// Operation queue over the shared store connection.
#[derive(Clone)]
pub struct OperationQueue {
    conn: SharedConnection,
}

impl OperationQueue {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Appends a `pending` entry with zero retries.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        local_key: LocalKey,
        landmark_id: Option<LandmarkId>,
        payload: impl Into<String>,
    ) -> QueueResult<QueuedOperation> {
        let entry = QueuedOperation::new(kind, local_key, landmark_id, payload);
        let stored = self.with_repo(|repo| repo.insert(&entry))?;
        info!(
            "event=queue_enqueue module=queue status=ok op_id={} kind={} local_key={} landmark_id={}",
            stored.id.unwrap_or_default(),
            kind.as_str(),
            local_key,
            display_id(landmark_id)
        );
        Ok(stored)
    }

    /// Enqueues `kind` with the landmark's current state as payload.
    pub fn enqueue_snapshot(
        &self,
        kind: OperationKind,
        landmark: &Landmark,
    ) -> QueueResult<QueuedOperation> {
        let payload = landmark_payload(landmark)?;
        self.enqueue(kind, landmark.local_key, landmark.id, payload)
    }

    /// Records a mutation the remote service already refused. The entry is
    /// dead-lettered at once so it is never replayed automatically.
    pub fn enqueue_rejected(
        &self,
        kind: OperationKind,
        landmark: &Landmark,
        message: impl Into<String>,
    ) -> QueueResult<QueuedOperation> {
        let mut entry = self.enqueue_snapshot(kind, landmark)?;
        self.mark_processing(&mut entry)?;
        self.mark_rejected(&mut entry, message)?;
        Ok(entry)
    }

    pub fn get(&self, id: OperationId) -> QueueResult<Option<QueuedOperation>> {
        self.with_repo(|repo| repo.get(id))
    }

    /// Every entry in enqueue order.
    pub fn list_all(&self) -> QueueResult<Vec<QueuedOperation>> {
        self.with_repo(|repo| repo.list_all())
    }

    pub fn list_by_status(&self, status: OperationStatus) -> QueueResult<Vec<QueuedOperation>> {
        self.with_repo(|repo| repo.list_by_status(status))
    }

    pub fn mark_processing(&self, entry: &mut QueuedOperation) -> QueueResult<()> {
        entry.start_processing()?;
        self.persist(entry)
    }

    pub fn mark_completed(&self, entry: &mut QueuedOperation) -> QueueResult<()> {
        entry.complete()?;
        self.persist(entry)
    }

    /// Records a retryable failure; increments `retry_count`.
    pub fn mark_failed(
        &self,
        entry: &mut QueuedOperation,
        message: impl Into<String>,
    ) -> QueueResult<()> {
        entry.fail(message)?;
        self.persist(entry)
    }

    /// Records a permanent failure and dead-letters the entry.
    pub fn mark_rejected(
        &self,
        entry: &mut QueuedOperation,
        message: impl Into<String>,
    ) -> QueueResult<()> {
        entry.reject(message)?;
        self.persist(entry)
    }

    /// Entries eligible for the next drain, oldest first.
    pub fn drainable(&self) -> QueueResult<Vec<QueuedOperation>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(QueuedOperation::is_drainable)
            .collect())
    }

    /// True when `local_key` still has entries waiting for the remote.
    pub fn has_live_entries(&self, local_key: LocalKey) -> QueueResult<bool> {
        let entries = self.with_repo(|repo| repo.list_for_local_key(local_key))?;
        Ok(entries.iter().any(QueuedOperation::is_live))
    }

    /// Records reconciliation must not overwrite or resurrect.
    pub fn protected_set(&self) -> QueueResult<ProtectedSet> {
        let entries = self.list_all()?;
        Ok(ProtectedSet::from_operations(&entries))
    }

    /// Failed entries whose retry budget is exhausted.
    pub fn dead_letters(&self) -> QueueResult<Vec<QueuedOperation>> {
        Ok(self
            .list_by_status(OperationStatus::Failed)?
            .into_iter()
            .filter(QueuedOperation::is_dead_lettered)
            .collect())
    }

    /// Returns a dead letter to `pending` with a fresh retry budget.
    pub fn retry_dead_letter(&self, id: OperationId) -> QueueResult<QueuedOperation> {
        let mut entry = self.dead_letter(id)?;
        entry.requeue()?;
        self.persist(&entry)?;
        info!(
            "event=queue_retry module=queue status=ok op_id={} kind={}",
            id,
            entry.kind.as_str()
        );
        Ok(entry)
    }

    /// Drops a dead letter. Its landmark stops being protected from the next
    /// reconciliation.
    pub fn discard_dead_letter(&self, id: OperationId) -> QueueResult<QueuedOperation> {
        let entry = self.dead_letter(id)?;
        self.with_repo(|repo| repo.delete(id))?;
        info!(
            "event=queue_discard module=queue status=ok op_id={} kind={}",
            id,
            entry.kind.as_str()
        );
        Ok(entry)
    }

    /// Deletes terminal `completed` entries.
    pub fn purge_completed(&self) -> QueueResult<usize> {
        let removed = self.with_repo(|repo| repo.delete_by_status(OperationStatus::Completed))?;
        info!(
            "event=queue_purge module=queue status=ok removed={}",
            removed
        );
        Ok(removed)
    }

    /// Resets entries abandoned in `processing` back to `pending`.
    pub fn recover_interrupted(&self) -> QueueResult<usize> {
        let recovered = {
            let conn = db::lock(&self.conn)?;
            let repo = SqliteOperationRepository::new(&conn);
            let tx = conn.unchecked_transaction().map_err(RepoError::from)?;
            let mut recovered = 0;
            for mut entry in repo.list_by_status(OperationStatus::Processing)? {
                if entry.reset_interrupted() {
                    repo.update(&entry)?;
                    recovered += 1;
                }
            }
            tx.commit().map_err(RepoError::from)?;
            recovered
        };

        if recovered > 0 {
            warn!(
                "event=queue_recover module=queue status=ok recovered={}",
                recovered
            );
        }
        Ok(recovered)
    }

    pub fn counts(&self) -> QueueResult<QueueCounts> {
        let mut counts = QueueCounts::default();
        for entry in self.list_all()? {
            match entry.status {
                OperationStatus::Pending => counts.pending += 1,
                OperationStatus::Processing => counts.processing += 1,
                OperationStatus::Completed => counts.completed += 1,
                OperationStatus::Failed if entry.can_retry() => counts.failed_retryable += 1,
                OperationStatus::Failed => counts.dead_lettered += 1,
            }
        }
        Ok(counts)
    }

    fn dead_letter(&self, id: OperationId) -> QueueResult<QueuedOperation> {
        let entry = self
            .get(id)?
            .ok_or(QueueError::Repo(RepoError::OperationNotFound(id)))?;
        if !entry.is_dead_lettered() {
            return Err(QueueError::NotDeadLettered(id));
        }
        Ok(entry)
    }

    fn persist(&self, entry: &QueuedOperation) -> QueueResult<()> {
        self.with_repo(|repo| repo.update(entry))
    }

    fn with_repo<T>(
        &self,
        op: impl FnOnce(&SqliteOperationRepository<'_>) -> Result<T, RepoError>,
    ) -> QueueResult<T> {
        let conn = db::lock(&self.conn)?;
        let repo = SqliteOperationRepository::new(&conn);
        Ok(op(&repo)?)
    }
}

fn display_id(id: Option<LandmarkId>) -> String {
    id.map_or_else(|| "none".to_string(), |id| id.to_string())
}
