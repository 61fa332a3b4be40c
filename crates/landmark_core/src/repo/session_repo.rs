//! Session context persistence.
//!
//! Stores the session as key/value rows so new fields can be added without a
//! schema change. Missing keys load as `None`.

use super::{RepoError, RepoResult};
use crate::model::now_epoch_ms;
use crate::model::session::SessionContext;
use rusqlite::{params, Connection, OptionalExtension};

const KEY_TOKEN: &str = "token";
const KEY_USER_ID: &str = "user_id";
const KEY_EMAIL: &str = "email";
const KEY_DISPLAY_NAME: &str = "display_name";

/// SQLite-backed session store.
pub struct SqliteSessionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSessionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Loads the persisted session, or an empty context when none exists.
    pub fn load(&self) -> RepoResult<SessionContext> {
        let user_id = match self.get(KEY_USER_ID)? {
            Some(text) => Some(text.parse::<i64>().map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid user_id value `{text}` in session_entries"
                ))
            })?),
            None => None,
        };

        Ok(SessionContext {
            token: self.get(KEY_TOKEN)?,
            user_id,
            email: self.get(KEY_EMAIL)?,
            display_name: self.get(KEY_DISPLAY_NAME)?,
        })
    }

    /// Replaces the persisted session atomically.
    pub fn save(&self, session: &SessionContext) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let user_id = session.user_id.map(|id| id.to_string());
        for (key, value) in [
            (KEY_TOKEN, session.token.as_deref()),
            (KEY_USER_ID, user_id.as_deref()),
            (KEY_EMAIL, session.email.as_deref()),
            (KEY_DISPLAY_NAME, session.display_name.as_deref()),
        ] {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO session_entries (key, value, updated_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at;",
                        params![key, value, now_epoch_ms()],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM session_entries WHERE key = ?1;", [key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear(&self) -> RepoResult<()> {
        self.conn.execute("DELETE FROM session_entries;", [])?;
        Ok(())
    }

    fn get(&self, key: &str) -> RepoResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM session_entries WHERE key = ?1;",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    }
}
