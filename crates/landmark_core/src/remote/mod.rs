//! Remote service contracts.
//!
//! # Responsibility
//! - Describe the authoritative landmark CRUD API and the auth surface as
//!   object-safe async traits.
//! - Classify remote failures into transient and permanent ones.
//!
//! # Invariants
//! - Transport, authentication handshake and image upload live behind these
//!   traits; core code never speaks HTTP.
//! - Every remote call made by core goes through [`with_timeout`].

use crate::model::landmark::{Landmark, LandmarkId};
use crate::model::wire::DecodeError;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure reported by a remote collaborator.
#[derive(Debug)]
pub enum RemoteError {
    /// Network unreachable, connection reset, DNS failure.
    Unreachable(String),
    /// The call did not finish within the configured limit.
    Timeout(Duration),
    /// Non-success HTTP status other than 404.
    Status { code: u16, message: String },
    /// The addressed record does not exist remotely.
    NotFound,
    /// The response body did not match the wire schema.
    Decode(DecodeError),
}

impl RemoteError {
    /// Transient failures are retried through the operation queue.
    ///
    /// Network errors, timeouts, 5xx, 408 and 429 are transient. Other 4xx
    /// and decode failures are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            Self::NotFound | Self::Decode(_) => false,
        }
    }

    /// The service could not be reached at all. Replaying queued writes
    /// would only spend their retry budget.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }

    /// Short stable label for log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "remote_unreachable",
            Self::Timeout(_) => "remote_timeout",
            Self::Status { .. } => "remote_status",
            Self::NotFound => "remote_not_found",
            Self::Decode(_) => "remote_decode",
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(message) => write!(f, "remote service unreachable: {message}"),
            Self::Timeout(limit) => {
                write!(f, "remote call timed out after {} ms", limit.as_millis())
            }
            Self::Status { code, message } => {
                write!(f, "remote service returned {code}: {message}")
            }
            Self::NotFound => write!(f, "remote record not found"),
            Self::Decode(err) => write!(f, "invalid remote response: {err}"),
        }
    }
}

impl Error for RemoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for RemoteError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Fields sent on remote create/update.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkWrite {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Local image file to upload with the write.
    pub image_path: Option<String>,
}

impl LandmarkWrite {
    pub fn from_landmark(landmark: &Landmark) -> Self {
        Self {
            title: landmark.title.clone(),
            latitude: landmark.latitude(),
            longitude: landmark.longitude(),
            image_path: landmark.image_path.clone(),
        }
    }
}

/// Authoritative landmark CRUD service.
#[async_trait]
pub trait LandmarkRemote: Send + Sync {
    /// Lists every landmark known to the server.
    async fn get_landmarks(&self) -> RemoteResult<Vec<Landmark>>;

    /// Creates a landmark and returns the server copy with its identity.
    async fn create_landmark(&self, write: &LandmarkWrite) -> RemoteResult<Landmark>;

    async fn update_landmark(&self, id: LandmarkId, write: &LandmarkWrite)
        -> RemoteResult<Landmark>;

    async fn delete_landmark(&self, id: LandmarkId) -> RemoteResult<()>;
}

/// Profile returned by the auth surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
}

/// Successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub user: UserProfile,
}

/// Profile fields accepted by `update_profile`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Authentication surface of the remote service.
#[async_trait]
pub trait AuthRemote: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> RemoteResult<AuthSession>;

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> RemoteResult<AuthSession>;

    async fn logout(&self, token: &str) -> RemoteResult<()>;

    async fn update_profile(&self, token: &str, update: &ProfileUpdate)
        -> RemoteResult<UserProfile>;

    async fn change_password(
        &self,
        token: &str,
        current_password: &str,
        new_password: &str,
    ) -> RemoteResult<()>;
}

/// Runs a remote call with a bounded timeout. Expiry maps to
/// [`RemoteError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::{with_timeout, RemoteError};
    use crate::model::wire::DecodeError;
    use std::time::Duration;

    #[test]
    fn classifies_transient_and_permanent_failures() {
        assert!(RemoteError::Unreachable("reset".to_string()).is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transient());
        for code in [500, 502, 503, 408, 429] {
            let err = RemoteError::Status {
                code,
                message: String::new(),
            };
            assert!(err.is_transient(), "{code} should be transient");
        }
        for code in [400, 401, 403, 409, 422] {
            let err = RemoteError::Status {
                code,
                message: String::new(),
            };
            assert!(!err.is_transient(), "{code} should be permanent");
        }
        assert!(!RemoteError::NotFound.is_transient());
        assert!(!RemoteError::Decode(DecodeError::MissingField("id")).is_transient());
    }

    #[test]
    fn only_network_and_timeout_failures_are_unreachable() {
        assert!(RemoteError::Unreachable("refused".to_string()).is_unreachable());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_unreachable());
        let overloaded = RemoteError::Status {
            code: 503,
            message: String::new(),
        };
        assert!(overloaded.is_transient());
        assert!(!overloaded.is_unreachable());
    }

    #[tokio::test]
    async fn with_timeout_maps_expiry_to_timeout_error() {
        let limit = Duration::from_millis(10);
        let result: Result<(), RemoteError> = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Timeout(value)) if value == limit));
    }

    #[tokio::test]
    async fn with_timeout_passes_through_fast_results() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
