//! Fetch-and-merge reconciliation of the local cache against the remote list.
//!
//! # Responsibility
//! - Serve cached landmarks for cache-first reads.
//! - Decide whether a remote list changes local state and, if so, replace the
//!   store contents in one transaction.
//!
//! # Invariants
//! - Reconciling twice against an unchanged remote list is a no-op.
//! - Records with live queue entries survive a replace and keep their local
//!   version; identities with a live queued delete are never re-inserted.
//! - Unsynced records with dead-lettered entries survive until the entry is
//!   retried or discarded.
//! - Known identities keep their `local_key` and `created_at` across replaces.

use crate::db::{self, DbError, SharedConnection};
use crate::model::landmark::{Landmark, LandmarkId, LocalKey};
use crate::model::operation::{OperationKind, QueuedOperation};
use crate::remote::{with_timeout, LandmarkRemote, RemoteError};
use crate::repo::landmark_repo::{LandmarkRepository, SqliteLandmarkRepository};
use crate::repo::RepoError;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records a full replace must keep untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedSet {
    /// Landmarks with live queue entries.
    pub local_keys: HashSet<LocalKey>,
    /// Landmarks with dead-lettered entries. Their rows stay protected while
    /// unsynced, until the entry is retried or discarded.
    pub dead_letter_keys: HashSet<LocalKey>,
    /// Server identities targeted by a live queued delete.
    pub pending_delete_ids: HashSet<LandmarkId>,
}

impl ProtectedSet {
    /// Completed entries are ignored.
    pub fn from_operations<'a>(entries: impl IntoIterator<Item = &'a QueuedOperation>) -> Self {
        let mut protected = Self::default();
        for entry in entries {
            if entry.is_live() {
                protected.local_keys.insert(entry.local_key);
                if let (OperationKind::Delete, Some(id)) = (entry.kind, entry.landmark_id) {
                    protected.pending_delete_ids.insert(id);
                }
            } else if entry.is_dead_lettered() {
                protected.dead_letter_keys.insert(entry.local_key);
            }
        }
        protected
    }

    pub fn is_empty(&self) -> bool {
        self.local_keys.is_empty()
            && self.dead_letter_keys.is_empty()
            && self.pending_delete_ids.is_empty()
    }

    /// True when a replace must keep `landmark` as stored.
    pub fn protects(&self, landmark: &Landmark) -> bool {
        self.local_keys.contains(&landmark.local_key)
            || (!landmark.is_synced && self.dead_letter_keys.contains(&landmark.local_key))
    }
}

/// Result of comparing a remote list with local state.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilePlan {
    /// Local state already matches the remote list.
    Unchanged,
    Replace {
        /// Protected local rows to keep as they are.
        retained: Vec<LocalKey>,
        /// Remote records to write, already mapped onto local keys.
        incoming: Vec<Landmark>,
    },
}

/// Plans a reconciliation without touching storage.
///
/// `local` must be in display order (newest `created_at` first).
pub fn plan_reconcile(
    remote: Vec<Landmark>,
    local: &[Landmark],
    protected: &ProtectedSet,
) -> ReconcilePlan {
    let local_by_id: HashMap<LandmarkId, &Landmark> = local
        .iter()
        .filter_map(|landmark| landmark.id.map(|id| (id, landmark)))
        .collect();
    let protected_ids: HashSet<LandmarkId> = local
        .iter()
        .filter(|landmark| protected.protects(landmark))
        .filter_map(|landmark| landmark.id)
        .collect();

    let mut seen: HashSet<LandmarkId> = HashSet::new();
    let mut incoming: Vec<Landmark> = Vec::with_capacity(remote.len());
    for mut record in remote {
        let Some(id) = record.id else {
            continue;
        };
        if !seen.insert(id)
            || protected.pending_delete_ids.contains(&id)
            || protected_ids.contains(&id)
        {
            continue;
        }
        if let Some(existing) = local_by_id.get(&id) {
            record.local_key = existing.local_key;
            record.created_at = existing.created_at;
            record.updated_at = record.updated_at.max(existing.created_at);
            if record.image_path.is_none() {
                record.image_path = existing.image_path.clone();
            }
        }
        record.is_synced = true;
        incoming.push(record);
    }
    sort_for_display(&mut incoming);

    let unprotected: Vec<&Landmark> = local
        .iter()
        .filter(|landmark| !protected.protects(landmark))
        .collect();

    if same_landmarks(&incoming, &unprotected) {
        return ReconcilePlan::Unchanged;
    }

    let retained = local
        .iter()
        .filter(|landmark| protected.protects(landmark))
        .map(|landmark| landmark.local_key)
        .collect();
    ReconcilePlan::Replace { retained, incoming }
}

/// Pairwise comparison in order on identity, title, latitude and longitude.
pub fn same_landmarks(remote: &[Landmark], local: &[&Landmark]) -> bool {
    remote.len() == local.len()
        && remote.iter().zip(local.iter()).all(|(left, right)| {
            left.id == right.id
                && left.title == right.title
                && left.latitude() == right.latitude()
                && left.longitude() == right.longitude()
        })
}

fn sort_for_display(landmarks: &mut [Landmark]) {
    landmarks.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.cmp(&right.id))
            .then_with(|| left.local_key.cmp(&right.local_key))
    });
}

#[derive(Debug)]
pub enum ReconcileError {
    /// Remote fetch failed; the cache is untouched.
    Remote(RemoteError),
    /// Local storage failed while reading or replacing.
    Storage(RepoError),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<RemoteError> for ReconcileError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<RepoError> for ReconcileError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<DbError> for ReconcileError {
    fn from(value: DbError) -> Self {
        Self::Storage(RepoError::Db(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Unchanged(Vec<Landmark>),
    Replaced(Vec<Landmark>),
}

impl ReconcileOutcome {
    pub fn landmarks(&self) -> &[Landmark] {
        match self {
            Self::Unchanged(landmarks) | Self::Replaced(landmarks) => landmarks,
        }
    }

    pub fn into_landmarks(self) -> Vec<Landmark> {
        match self {
            Self::Unchanged(landmarks) | Self::Replaced(landmarks) => landmarks,
        }
    }
}

/// Reconciler over the shared store and a remote landmark service.
pub struct Reconciler {
    conn: SharedConnection,
    remote: Arc<dyn LandmarkRemote>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(conn: SharedConnection, remote: Arc<dyn LandmarkRemote>, timeout: Duration) -> Self {
        Self {
            conn,
            remote,
            timeout,
        }
    }

    /// Current store contents in display order.
    pub fn cached(&self) -> Result<Vec<Landmark>, ReconcileError> {
        let conn = db::lock(&self.conn)?;
        Ok(SqliteLandmarkRepository::new(&conn).get_all()?)
    }

    /// Fetches the remote list and merges it into the store.
    pub async fn fetch_and_merge(
        &self,
        protected: &ProtectedSet,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let started_at = Instant::now();
        let remote = match with_timeout(self.timeout, self.remote.get_landmarks()).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(
                    "event=reconcile module=reconcile status=error duration_ms={} error_code={} transient={}",
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err.is_transient()
                );
                return Err(err.into());
            }
        };
        let fetched = remote.len();

        let conn = db::lock(&self.conn)?;
        let repo = SqliteLandmarkRepository::new(&conn);
        let local = repo.get_all()?;

        let outcome = match plan_reconcile(remote, &local, protected) {
            ReconcilePlan::Unchanged => ReconcileOutcome::Unchanged(local),
            ReconcilePlan::Replace { retained, incoming } => {
                repo.replace_all(&retained, &incoming)?;
                ReconcileOutcome::Replaced(repo.get_all()?)
            }
        };

        info!(
            "event=reconcile module=reconcile status=ok duration_ms={} fetched={} protected={} replaced={} count={}",
            started_at.elapsed().as_millis(),
            fetched,
            protected.local_keys.len() + protected.dead_letter_keys.len(),
            matches!(outcome, ReconcileOutcome::Replaced(_)),
            outcome.landmarks().len()
        );
        Ok(outcome)
    }
}
