//! Queue drain: replays queued mutations against the remote service.
//!
//! Entries are grouped into per-landmark lanes. Lanes run concurrently; inside
//! a lane entries run one at a time in enqueue order, and a transient failure
//! stops the lane so later entries cannot overtake it.

use super::{display_id, OperationQueue, QueueResult};
use crate::db;
use crate::model::landmark::{Landmark, LandmarkId, LocalKey};
use crate::model::operation::{OperationKind, QueuedOperation};
use crate::model::wire::landmark_from_json_str;
use crate::remote::{with_timeout, LandmarkRemote, LandmarkWrite, RemoteError};
use crate::repo::landmark_repo::{LandmarkRepository, SqliteLandmarkRepository};
use crate::repo::operation_repo::{OperationRepository, SqliteOperationRepository};
use futures::future::join_all;
use log::{error, info, warn};
use std::time::{Duration, Instant};

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries sent to the remote service.
    pub attempted: usize,
    pub completed: usize,
    /// Transient failures that remain retry-eligible.
    pub failed: usize,
    /// Entries dead-lettered during this pass.
    pub dead_lettered: usize,
    /// Dead letters left untouched by this pass.
    pub skipped: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.attempted += other.attempted;
        self.completed += other.completed;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
    }
}

enum Attempt {
    /// Remote accepted the mutation. Carries the server copy when returned.
    Confirmed(Option<Landmark>),
    /// Target no longer exists remotely; nothing left to do.
    Gone,
    Transient(String),
    Permanent(String),
}

impl OperationQueue {
    /// Replays every pending and retry-eligible entry.
    ///
    /// One lane's failure never blocks another lane. Storage failures abort
    /// the pass after every lane has stopped.
    pub async fn drain(
        &self,
        remote: &dyn LandmarkRemote,
        timeout: Duration,
    ) -> QueueResult<DrainReport> {
        let started_at = Instant::now();
        let entries = self.drainable()?;
        let skipped = self.dead_letters()?.len();
        let lanes = group_into_lanes(entries);

        info!(
            "event=queue_drain module=queue status=start lanes={} skipped={}",
            lanes.len(),
            skipped
        );

        let results = join_all(
            lanes
                .into_iter()
                .map(|lane| self.drain_lane(remote, timeout, lane)),
        )
        .await;

        let mut report = DrainReport {
            skipped,
            ..DrainReport::default()
        };
        let mut first_error = None;
        for result in results {
            match result {
                Ok(lane_report) => report.merge(lane_report),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            error!(
                "event=queue_drain module=queue status=error duration_ms={} error_code=queue_storage_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        info!(
            "event=queue_drain module=queue status=ok duration_ms={} attempted={} completed={} failed={} dead_lettered={} skipped={}",
            started_at.elapsed().as_millis(),
            report.attempted,
            report.completed,
            report.failed,
            report.dead_lettered,
            report.skipped
        );
        Ok(report)
    }

    async fn drain_lane(
        &self,
        remote: &dyn LandmarkRemote,
        timeout: Duration,
        lane: Vec<QueuedOperation>,
    ) -> QueueResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut assigned_id: Option<LandmarkId> = None;

        for mut entry in lane {
            if entry.landmark_id.is_none() {
                entry.landmark_id = assigned_id;
            }
            self.mark_processing(&mut entry)?;
            report.attempted += 1;

            let started_at = Instant::now();
            let attempt = attempt_entry(remote, timeout, &entry).await;
            let op_id = entry.id.unwrap_or_default();

            match attempt {
                Attempt::Confirmed(server_copy) => {
                    if entry.kind == OperationKind::Create {
                        if let Some(id) = server_copy.as_ref().and_then(|copy| copy.id) {
                            entry.landmark_id = Some(id);
                            assigned_id = Some(id);
                        }
                    }
                    self.mark_completed(&mut entry)?;
                    self.settle_local(&entry, server_copy.as_ref())?;
                    report.completed += 1;
                    info!(
                        "event=queue_op module=queue status=ok op_id={} kind={} landmark_id={} duration_ms={}",
                        op_id,
                        entry.kind.as_str(),
                        display_id(entry.landmark_id),
                        started_at.elapsed().as_millis()
                    );
                }
                Attempt::Gone => {
                    self.mark_completed(&mut entry)?;
                    self.settle_local(&entry, None)?;
                    report.completed += 1;
                    info!(
                        "event=queue_op module=queue status=ok op_id={} kind={} landmark_id={} outcome=remote_missing",
                        op_id,
                        entry.kind.as_str(),
                        display_id(entry.landmark_id)
                    );
                }
                Attempt::Transient(message) => {
                    self.mark_failed(&mut entry, message)?;
                    if entry.is_dead_lettered() {
                        report.dead_lettered += 1;
                    } else {
                        report.failed += 1;
                    }
                    warn!(
                        "event=queue_op module=queue status=error op_id={} kind={} retry_count={} error_code=remote_transient duration_ms={}",
                        op_id,
                        entry.kind.as_str(),
                        entry.retry_count,
                        started_at.elapsed().as_millis()
                    );
                    break;
                }
                Attempt::Permanent(message) => {
                    self.mark_rejected(&mut entry, message)?;
                    report.dead_lettered += 1;
                    warn!(
                        "event=queue_op module=queue status=error op_id={} kind={} retry_count={} error_code=remote_rejected",
                        op_id,
                        entry.kind.as_str(),
                        entry.retry_count
                    );
                }
            }
        }

        Ok(report)
    }

    /// Mirrors a confirmed entry into the landmark store.
    ///
    /// A confirmed create stamps the server identity on the local row and on
    /// later entries of the same landmark. The row is marked synced only when
    /// no live entries remain for it.
    fn settle_local(
        &self,
        entry: &QueuedOperation,
        server_copy: Option<&Landmark>,
    ) -> QueueResult<()> {
        let conn = db::lock(&self.conn)?;
        let operations = SqliteOperationRepository::new(&conn);
        let landmarks = SqliteLandmarkRepository::new(&conn);

        if let (OperationKind::Create, Some(id)) = (entry.kind, entry.landmark_id) {
            operations.assign_landmark_id(entry.local_key, id)?;
        }

        let Some(mut local) = landmarks.get_by_local_key(entry.local_key)? else {
            return Ok(());
        };

        let still_queued = operations
            .list_for_local_key(entry.local_key)?
            .iter()
            .any(QueuedOperation::is_live);

        if still_queued {
            if local.id.is_none() && entry.landmark_id.is_some() {
                local.id = entry.landmark_id;
                if let Some(image) = server_copy.and_then(|copy| copy.image.clone()) {
                    local.image = Some(image);
                }
                landmarks.update(&local)?;
            }
            return Ok(());
        }

        if let Some(copy) = server_copy {
            local.absorb_remote(copy);
        } else if local.id.is_none() {
            local.id = entry.landmark_id;
        }
        local.is_synced = true;
        landmarks.update(&local)?;
        Ok(())
    }
}

async fn attempt_entry(
    remote: &dyn LandmarkRemote,
    timeout: Duration,
    entry: &QueuedOperation,
) -> Attempt {
    let snapshot = match landmark_from_json_str(&entry.payload) {
        Ok(snapshot) => snapshot,
        Err(err) => return Attempt::Permanent(format!("unreadable payload: {err}")),
    };
    let write = LandmarkWrite::from_landmark(&snapshot);

    let result = match (entry.kind, entry.landmark_id) {
        (OperationKind::Create, _) => {
            with_timeout(timeout, remote.create_landmark(&write))
                .await
                .map(Some)
        }
        (OperationKind::Update, Some(id)) => {
            with_timeout(timeout, remote.update_landmark(id, &write))
                .await
                .map(Some)
        }
        (OperationKind::Update, None) => {
            return Attempt::Permanent("update has no server identity".to_string());
        }
        (OperationKind::Delete, Some(id)) => {
            with_timeout(timeout, remote.delete_landmark(id))
                .await
                .map(|()| None)
        }
        // Never created remotely, so there is nothing to delete.
        (OperationKind::Delete, None) => return Attempt::Gone,
    };

    match result {
        Ok(server_copy) => Attempt::Confirmed(server_copy),
        Err(RemoteError::NotFound) if entry.kind != OperationKind::Create => Attempt::Gone,
        Err(err) if err.is_transient() => Attempt::Transient(err.to_string()),
        Err(err) => Attempt::Permanent(err.to_string()),
    }
}

/// Groups entries by landmark, keeping lane order by each lane's oldest entry
/// and entry order within a lane.
fn group_into_lanes(entries: Vec<QueuedOperation>) -> Vec<Vec<QueuedOperation>> {
    let mut keys: Vec<LocalKey> = Vec::new();
    let mut lanes: Vec<Vec<QueuedOperation>> = Vec::new();
    for entry in entries {
        match keys.iter().position(|key| *key == entry.local_key) {
            Some(index) => lanes[index].push(entry),
            None => {
                keys.push(entry.local_key);
                lanes.push(vec![entry]);
            }
        }
    }
    lanes
}
