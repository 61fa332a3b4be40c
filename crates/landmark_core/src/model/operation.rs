//! Queued offline mutation model.
//!
//! # Responsibility
//! - Define operation kinds, entry status and retry bookkeeping.
//! - Enforce the per-entry status machine.
//!
//! # Invariants
//! - `pending -> processing -> {completed | failed}`.
//! - `failed -> processing` only while `retry_count < MAX_RETRY_COUNT`.
//! - `completed` is terminal.

use super::landmark::{LandmarkId, LocalKey};
use super::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Retry ceiling. A failed entry with this many retries is dead-lettered.
pub const MAX_RETRY_COUNT: u32 = 5;

/// Local auto-increment identity of a queue entry.
pub type OperationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
    Completed,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "FAILED" => Some(Self::Failed),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OperationStatus,
    pub to: OperationStatus,
    pub retry_count: u32,
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal operation transition {} -> {} (retry_count={})",
            self.from, self.to, self.retry_count
        )
    }
}

impl Error for TransitionError {}

/// One durable entry of the offline operation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    /// `None` until the entry is persisted.
    pub id: Option<OperationId>,
    pub kind: OperationKind,
    /// Entity the operation targets; used to keep per-entity FIFO order.
    pub local_key: LocalKey,
    /// Server identity, absent for creates that were never confirmed.
    pub landmark_id: Option<LandmarkId>,
    /// Landmark wire JSON captured at enqueue time.
    pub payload: String,
    pub status: OperationStatus,
    pub created_at: i64,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub last_retry_at: Option<i64>,
}

impl QueuedOperation {
    /// Creates a fresh `pending` entry with zero retries.
    pub fn new(
        kind: OperationKind,
        local_key: LocalKey,
        landmark_id: Option<LandmarkId>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind,
            local_key,
            landmark_id,
            payload: payload.into(),
            status: OperationStatus::Pending,
            created_at: now_epoch_ms(),
            retry_count: 0,
            error_message: None,
            last_retry_at: None,
        }
    }

    /// True iff the entry failed and still has retry budget.
    pub fn can_retry(&self) -> bool {
        self.status == OperationStatus::Failed && self.retry_count < MAX_RETRY_COUNT
    }

    /// Failed with the retry budget exhausted; never retried automatically.
    pub fn is_dead_lettered(&self) -> bool {
        self.status == OperationStatus::Failed && self.retry_count >= MAX_RETRY_COUNT
    }

    /// Eligible for the next drain pass.
    pub fn is_drainable(&self) -> bool {
        self.status == OperationStatus::Pending || self.can_retry()
    }

    /// Still expected to reach the remote service eventually.
    pub fn is_live(&self) -> bool {
        self.is_drainable() || self.status == OperationStatus::Processing
    }

    pub fn start_processing(&mut self) -> Result<(), TransitionError> {
        if !self.is_drainable() {
            return Err(self.transition_error(OperationStatus::Processing));
        }
        self.status = OperationStatus::Processing;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.require_processing(OperationStatus::Completed)?;
        self.status = OperationStatus::Completed;
        self.error_message = None;
        Ok(())
    }

    /// Records a retryable failure: increments `retry_count`, stamps
    /// `last_retry_at`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require_processing(OperationStatus::Failed)?;
        self.status = OperationStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.error_message = Some(message.into());
        self.last_retry_at = Some(now_epoch_ms());
        Ok(())
    }

    /// Records a permanent failure. The entry is dead-lettered immediately.
    pub fn reject(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require_processing(OperationStatus::Failed)?;
        self.status = OperationStatus::Failed;
        self.retry_count = self.retry_count.max(MAX_RETRY_COUNT);
        self.error_message = Some(message.into());
        self.last_retry_at = Some(now_epoch_ms());
        Ok(())
    }

    /// Puts a dead-lettered entry back in line with a fresh retry budget.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        if !self.is_dead_lettered() {
            return Err(self.transition_error(OperationStatus::Pending));
        }
        self.status = OperationStatus::Pending;
        self.retry_count = 0;
        self.error_message = None;
        Ok(())
    }

    /// Returns an abandoned `processing` entry to `pending`.
    pub fn reset_interrupted(&mut self) -> bool {
        if self.status != OperationStatus::Processing {
            return false;
        }
        self.status = OperationStatus::Pending;
        true
    }

    fn require_processing(&self, to: OperationStatus) -> Result<(), TransitionError> {
        if self.status != OperationStatus::Processing {
            return Err(self.transition_error(to));
        }
        Ok(())
    }

    fn transition_error(&self, to: OperationStatus) -> TransitionError {
        TransitionError {
            from: self.status,
            to,
            retry_count: self.retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OperationKind, OperationStatus, QueuedOperation, MAX_RETRY_COUNT};
    use uuid::Uuid;

    fn entry() -> QueuedOperation {
        QueuedOperation::new(OperationKind::Create, Uuid::new_v4(), None, "{}")
    }

    #[test]
    fn new_entry_is_pending_with_zero_retries() {
        let op = entry();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.is_drainable());
        assert!(!op.can_retry());
    }

    #[test]
    fn can_retry_only_for_failed_below_ceiling() {
        let mut op = entry();
        for status in [
            OperationStatus::Pending,
            OperationStatus::Processing,
            OperationStatus::Completed,
        ] {
            op.status = status;
            op.retry_count = 0;
            assert!(!op.can_retry(), "{status} must not be retryable");
        }

        op.status = OperationStatus::Failed;
        op.retry_count = MAX_RETRY_COUNT - 1;
        assert!(op.can_retry());
        op.retry_count = MAX_RETRY_COUNT;
        assert!(!op.can_retry());
        assert!(op.is_dead_lettered());
    }

    #[test]
    fn five_failures_dead_letter_the_entry() {
        let mut op = entry();
        for _ in 0..MAX_RETRY_COUNT {
            op.start_processing().unwrap();
            op.fail("offline").unwrap();
        }
        assert_eq!(op.retry_count, MAX_RETRY_COUNT);
        assert!(op.is_dead_lettered());
        assert!(op.last_retry_at.is_some());

        let err = op.start_processing().unwrap_err();
        assert_eq!(err.from, OperationStatus::Failed);
        assert_eq!(err.to, OperationStatus::Processing);
    }

    #[test]
    fn completed_is_terminal() {
        let mut op = entry();
        op.start_processing().unwrap();
        op.complete().unwrap();
        assert!(op.start_processing().is_err());
        assert!(op.fail("late").is_err());
        assert!(!op.is_live());
    }

    #[test]
    fn reject_exhausts_retry_budget_at_once() {
        let mut op = entry();
        op.start_processing().unwrap();
        op.reject("422 invalid title").unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, MAX_RETRY_COUNT);
        assert!(!op.can_retry());
    }

    #[test]
    fn requeue_only_revives_dead_letters() {
        let mut op = entry();
        assert!(op.requeue().is_err());

        op.start_processing().unwrap();
        op.reject("422 invalid title").unwrap();
        op.requeue().unwrap();

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.error_message.is_none());
        assert!(op.is_live());
    }

    #[test]
    fn cannot_complete_without_processing() {
        let mut op = entry();
        assert!(op.complete().is_err());
    }

    #[test]
    fn wire_names_round_trip() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OperationStatus::parse("pending"), None);
    }
}
