//! Landmark repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the key-indexed landmark store used as the local source of truth.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - `get_all` and every list query return newest `created_at` first.
//! - Inserts are keyed by `local_key`; re-inserting the same record never
//!   creates a duplicate row.
//! - `replace_all` is atomic: the table is either fully replaced or untouched.

use super::{bool_to_int, parse_local_key, RepoError, RepoResult};
use crate::model::landmark::{Coordinates, Landmark, LandmarkId, LocalKey};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const LANDMARK_SELECT_SQL: &str = "SELECT
    local_key,
    remote_id,
    title,
    description,
    category,
    latitude,
    longitude,
    image,
    image_path,
    is_synced,
    created_at,
    updated_at
FROM landmarks";

const LANDMARK_ORDER_SQL: &str = " ORDER BY created_at DESC, remote_id ASC, local_key ASC";

const LANDMARK_UPSERT_SQL: &str = "INSERT INTO landmarks (
        local_key,
        remote_id,
        title,
        description,
        category,
        latitude,
        longitude,
        image,
        image_path,
        is_synced,
        created_at,
        updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(local_key) DO UPDATE SET
        remote_id = excluded.remote_id,
        title = excluded.title,
        description = excluded.description,
        category = excluded.category,
        latitude = excluded.latitude,
        longitude = excluded.longitude,
        image = excluded.image,
        image_path = excluded.image_path,
        is_synced = excluded.is_synced,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at;";

/// Persistent store contract for landmark records.
pub trait LandmarkRepository {
    /// Lists every record, newest `created_at` first.
    fn get_all(&self) -> RepoResult<Vec<Landmark>>;
    /// Looks up a record by server identity.
    fn get_by_id(&self, id: LandmarkId) -> RepoResult<Option<Landmark>>;
    fn get_by_local_key(&self, local_key: LocalKey) -> RepoResult<Option<Landmark>>;
    /// Case-insensitive substring match on title or description.
    fn search_by_text(&self, query: &str) -> RepoResult<Vec<Landmark>>;
    fn get_by_category(&self, category: &str) -> RepoResult<Vec<Landmark>>;
    /// Inserts or overwrites the row with the same `local_key`.
    fn insert(&self, landmark: &Landmark) -> RepoResult<()>;
    fn insert_batch(&self, landmarks: &[Landmark]) -> RepoResult<usize>;
    /// Overwrites an existing row; `LandmarkNotFound` when absent.
    fn update(&self, landmark: &Landmark) -> RepoResult<()>;
    fn delete_by_id(&self, id: LandmarkId) -> RepoResult<bool>;
    fn delete_by_local_key(&self, local_key: LocalKey) -> RepoResult<bool>;
    fn delete_all(&self) -> RepoResult<usize>;
    fn count(&self) -> RepoResult<u64>;
    /// Deletes every row not listed in `retained`, then upserts `incoming`,
    /// in one transaction.
    fn replace_all(&self, retained: &[LocalKey], incoming: &[Landmark]) -> RepoResult<()>;
}

/// SQLite-backed landmark repository.
pub struct SqliteLandmarkRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLandmarkRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_landmarks(
        &self,
        filter_sql: &str,
        bind_values: Vec<Value>,
    ) -> RepoResult<Vec<Landmark>> {
        let sql = format!("{LANDMARK_SELECT_SQL}{filter_sql}{LANDMARK_ORDER_SQL}");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut landmarks = Vec::new();
        while let Some(row) = rows.next()? {
            landmarks.push(parse_landmark_row(row)?);
        }
        Ok(landmarks)
    }

    fn query_one(&self, filter_sql: &str, bind_value: Value) -> RepoResult<Option<Landmark>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LANDMARK_SELECT_SQL}{filter_sql} LIMIT 1;"))?;
        let mut rows = stmt.query([bind_value])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_landmark_row(row)?)),
            None => Ok(None),
        }
    }
}

impl LandmarkRepository for SqliteLandmarkRepository<'_> {
    fn get_all(&self) -> RepoResult<Vec<Landmark>> {
        self.query_landmarks("", Vec::new())
    }

    fn get_by_id(&self, id: LandmarkId) -> RepoResult<Option<Landmark>> {
        self.query_one(" WHERE remote_id = ?1", Value::Integer(id))
    }

    fn get_by_local_key(&self, local_key: LocalKey) -> RepoResult<Option<Landmark>> {
        self.query_one(" WHERE local_key = ?1", Value::Text(local_key.to_string()))
    }

    fn search_by_text(&self, query: &str) -> RepoResult<Vec<Landmark>> {
        let normalized = WHITESPACE_RE.replace_all(query.trim(), " ");
        if normalized.is_empty() {
            return self.get_all();
        }

        // SQLite LIKE and NOCASE only fold ASCII, so matching happens here.
        let needle = normalized.to_lowercase();
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|landmark| {
                contains_folded(&landmark.title, &needle)
                    || landmark
                        .description
                        .as_deref()
                        .is_some_and(|description| contains_folded(description, &needle))
            })
            .collect())
    }

    fn get_by_category(&self, category: &str) -> RepoResult<Vec<Landmark>> {
        let trimmed = category.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let wanted = trimmed.to_lowercase();
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|landmark| {
                landmark
                    .category
                    .as_deref()
                    .is_some_and(|category| category.to_lowercase() == wanted)
            })
            .collect())
    }

    fn insert(&self, landmark: &Landmark) -> RepoResult<()> {
        upsert_landmark(self.conn, landmark)
    }

    fn insert_batch(&self, landmarks: &[Landmark]) -> RepoResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for landmark in landmarks {
            upsert_landmark(&tx, landmark)?;
        }
        tx.commit()?;
        Ok(landmarks.len())
    }

    fn update(&self, landmark: &Landmark) -> RepoResult<()> {
        landmark.validate()?;

        let changed = self.conn.execute(
            "UPDATE landmarks
             SET
                remote_id = ?2,
                title = ?3,
                description = ?4,
                category = ?5,
                latitude = ?6,
                longitude = ?7,
                image = ?8,
                image_path = ?9,
                is_synced = ?10,
                updated_at = ?11
             WHERE local_key = ?1;",
            params![
                landmark.local_key.to_string(),
                landmark.id,
                landmark.title.as_str(),
                landmark.description.as_deref(),
                landmark.category.as_deref(),
                landmark.latitude(),
                landmark.longitude(),
                landmark.image.as_deref(),
                landmark.image_path.as_deref(),
                bool_to_int(landmark.is_synced),
                landmark.updated_at,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::LandmarkNotFound(landmark.local_key));
        }
        Ok(())
    }

    fn delete_by_id(&self, id: LandmarkId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM landmarks WHERE remote_id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn delete_by_local_key(&self, local_key: LocalKey) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM landmarks WHERE local_key = ?1;",
            [local_key.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn delete_all(&self) -> RepoResult<usize> {
        Ok(self.conn.execute("DELETE FROM landmarks;", [])?)
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM landmarks;", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn replace_all(&self, retained: &[LocalKey], incoming: &[Landmark]) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        if retained.is_empty() {
            tx.execute("DELETE FROM landmarks;", [])?;
        } else {
            let placeholders = vec!["?"; retained.len()].join(", ");
            tx.execute(
                &format!("DELETE FROM landmarks WHERE local_key NOT IN ({placeholders});"),
                params_from_iter(retained.iter().map(|key| key.to_string())),
            )?;
        }

        for landmark in incoming {
            upsert_landmark(&tx, landmark)?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn upsert_landmark(conn: &Connection, landmark: &Landmark) -> RepoResult<()> {
    landmark.validate()?;

    conn.execute(
        LANDMARK_UPSERT_SQL,
        params![
            landmark.local_key.to_string(),
            landmark.id,
            landmark.title.as_str(),
            landmark.description.as_deref(),
            landmark.category.as_deref(),
            landmark.latitude(),
            landmark.longitude(),
            landmark.image.as_deref(),
            landmark.image_path.as_deref(),
            bool_to_int(landmark.is_synced),
            landmark.created_at,
            landmark.updated_at,
        ],
    )?;
    Ok(())
}

fn parse_landmark_row(row: &Row<'_>) -> RepoResult<Landmark> {
    let key_text: String = row.get("local_key")?;
    let local_key = parse_local_key(&key_text, "landmarks.local_key")?;

    let latitude: f64 = row.get("latitude")?;
    let longitude: f64 = row.get("longitude")?;
    let coordinates = Coordinates::new(latitude, longitude).map_err(|err| {
        RepoError::InvalidData(format!("landmark {key_text} has invalid coordinates: {err}"))
    })?;

    let is_synced = match row.get::<_, i64>("is_synced")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_synced value `{other}` in landmarks.is_synced"
            )));
        }
    };

    let landmark = Landmark {
        local_key,
        id: row.get("remote_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        category: row.get("category")?,
        coordinates,
        image: row.get("image")?,
        image_path: row.get("image_path")?,
        is_synced,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    landmark.validate()?;
    Ok(landmark)
}

/// Unicode-aware case-insensitive substring test; `needle` is lowercase.
fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}
