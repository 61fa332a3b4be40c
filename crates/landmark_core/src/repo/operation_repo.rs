//! Operation queue repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist queued mutations so they survive process restarts.
//! - Expose status-indexed listings in FIFO order.
//!
//! # Invariants
//! - Listings are ordered by `id ASC`, which is enqueue order.
//! - Status and kind round-trip through their upper-case wire names.

use super::{parse_local_key, RepoError, RepoResult};
use crate::model::landmark::{LandmarkId, LocalKey};
use crate::model::operation::{OperationId, OperationKind, OperationStatus, QueuedOperation};
use rusqlite::{params, params_from_iter, Connection, Row};

const OPERATION_SELECT_SQL: &str = "SELECT
    id,
    operation_type,
    local_key,
    landmark_id,
    payload,
    status,
    created_at,
    retry_count,
    error_message,
    last_retry_at
FROM operation_queue";

// AUTOINCREMENT ids are strictly increasing, so they encode enqueue order even
// when the wall clock steps backwards.
const FIFO_ORDER_SQL: &str = " ORDER BY id ASC";

/// Persistent store contract for the operation queue.
pub trait OperationRepository {
    /// Persists a new entry and returns it with its assigned id.
    fn insert(&self, operation: &QueuedOperation) -> RepoResult<QueuedOperation>;
    /// Overwrites status and retry bookkeeping of an existing entry.
    fn update(&self, operation: &QueuedOperation) -> RepoResult<()>;
    fn delete(&self, id: OperationId) -> RepoResult<()>;
    fn get(&self, id: OperationId) -> RepoResult<Option<QueuedOperation>>;
    fn list_all(&self) -> RepoResult<Vec<QueuedOperation>>;
    fn list_by_status(&self, status: OperationStatus) -> RepoResult<Vec<QueuedOperation>>;
    fn list_for_local_key(&self, local_key: LocalKey) -> RepoResult<Vec<QueuedOperation>>;
    fn count(&self) -> RepoResult<u64>;
    fn count_by_status(&self, status: OperationStatus) -> RepoResult<u64>;
    /// Stamps the server identity on every entry of one entity.
    fn assign_landmark_id(&self, local_key: LocalKey, id: LandmarkId) -> RepoResult<usize>;
    fn delete_by_status(&self, status: OperationStatus) -> RepoResult<usize>;
}

/// SQLite-backed operation queue repository.
pub struct SqliteOperationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOperationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn list_where(
        &self,
        filter_sql: &str,
        bind: Option<String>,
    ) -> RepoResult<Vec<QueuedOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OPERATION_SELECT_SQL}{filter_sql}{FIFO_ORDER_SQL};"
        ))?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next()? {
            operations.push(parse_operation_row(row)?);
        }
        Ok(operations)
    }
}

impl OperationRepository for SqliteOperationRepository<'_> {
    fn insert(&self, operation: &QueuedOperation) -> RepoResult<QueuedOperation> {
        self.conn.execute(
            "INSERT INTO operation_queue (
                operation_type,
                local_key,
                landmark_id,
                payload,
                status,
                created_at,
                retry_count,
                error_message,
                last_retry_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                operation.kind.as_str(),
                operation.local_key.to_string(),
                operation.landmark_id,
                operation.payload.as_str(),
                operation.status.as_str(),
                operation.created_at,
                operation.retry_count,
                operation.error_message.as_deref(),
                operation.last_retry_at,
            ],
        )?;

        let mut stored = operation.clone();
        stored.id = Some(self.conn.last_insert_rowid());
        Ok(stored)
    }

    fn update(&self, operation: &QueuedOperation) -> RepoResult<()> {
        let id = operation.id.ok_or_else(|| {
            RepoError::InvalidData("cannot update a queued operation without id".to_string())
        })?;

        let changed = self.conn.execute(
            "UPDATE operation_queue
             SET
                landmark_id = ?2,
                status = ?3,
                retry_count = ?4,
                error_message = ?5,
                last_retry_at = ?6
             WHERE id = ?1;",
            params![
                id,
                operation.landmark_id,
                operation.status.as_str(),
                operation.retry_count,
                operation.error_message.as_deref(),
                operation.last_retry_at,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::OperationNotFound(id));
        }
        Ok(())
    }

    fn delete(&self, id: OperationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM operation_queue WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::OperationNotFound(id));
        }
        Ok(())
    }

    fn get(&self, id: OperationId) -> RepoResult<Option<QueuedOperation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{OPERATION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_operation_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_all(&self) -> RepoResult<Vec<QueuedOperation>> {
        self.list_where("", None)
    }

    fn list_by_status(&self, status: OperationStatus) -> RepoResult<Vec<QueuedOperation>> {
        self.list_where(" WHERE status = ?1", Some(status.as_str().to_string()))
    }

    fn list_for_local_key(&self, local_key: LocalKey) -> RepoResult<Vec<QueuedOperation>> {
        self.list_where(" WHERE local_key = ?1", Some(local_key.to_string()))
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM operation_queue;", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn count_by_status(&self, status: OperationStatus) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operation_queue WHERE status = ?1;",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn assign_landmark_id(&self, local_key: LocalKey, id: LandmarkId) -> RepoResult<usize> {
        Ok(self.conn.execute(
            "UPDATE operation_queue SET landmark_id = ?2 WHERE local_key = ?1;",
            params![local_key.to_string(), id],
        )?)
    }

    fn delete_by_status(&self, status: OperationStatus) -> RepoResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM operation_queue WHERE status = ?1;",
            [status.as_str()],
        )?)
    }
}

fn parse_operation_row(row: &Row<'_>) -> RepoResult<QueuedOperation> {
    let kind_text: String = row.get("operation_type")?;
    let kind = OperationKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid operation type `{kind_text}` in operation_queue.operation_type"
        ))
    })?;

    let status_text: String = row.get("status")?;
    let status = OperationStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in operation_queue.status"
        ))
    })?;

    let key_text: String = row.get("local_key")?;
    let retry_count: i64 = row.get("retry_count")?;
    let retry_count = u32::try_from(retry_count).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid retry_count `{retry_count}` in operation_queue.retry_count"
        ))
    })?;

    Ok(QueuedOperation {
        id: Some(row.get("id")?),
        kind,
        local_key: parse_local_key(&key_text, "operation_queue.local_key")?,
        landmark_id: row.get("landmark_id")?,
        payload: row.get("payload")?,
        status,
        created_at: row.get("created_at")?,
        retry_count,
        error_message: row.get("error_message")?,
        last_retry_at: row.get("last_retry_at")?,
    })
}
