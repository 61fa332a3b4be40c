//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the persistent store contracts for landmarks, queued operations
//!   and the session context.
//! - Isolate SQLite query details from queue/reconcile/service orchestration.
//!
//! # Invariants
//! - Landmark writes re-check `Landmark::validate()` before persistence.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

use crate::db::DbError;
use crate::model::landmark::{LandmarkValidationError, LocalKey};
use crate::model::operation::OperationId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod landmark_repo;
pub mod operation_repo;
pub mod session_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(LandmarkValidationError),
    Db(DbError),
    LandmarkNotFound(LocalKey),
    OperationNotFound(OperationId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::LandmarkNotFound(key) => write!(f, "landmark not found: {key}"),
            Self::OperationNotFound(id) => write!(f, "queued operation not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::LandmarkNotFound(_) | Self::OperationNotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<LandmarkValidationError> for RepoError {
    fn from(value: LandmarkValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn parse_local_key(value: &str, column: &str) -> RepoResult<LocalKey> {
    uuid::Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
