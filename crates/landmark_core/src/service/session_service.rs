//! Session use-cases over the remote auth surface.
//!
//! The session lives in an explicit `SessionContext` owned by this service and
//! persisted through `SqliteSessionRepository`. Auth calls are serialized.

use crate::db::{self, DbError, SharedConnection};
use crate::model::session::SessionContext;
use crate::remote::{with_timeout, AuthRemote, AuthSession, ProfileUpdate, RemoteError};
use crate::repo::session_repo::SqliteSessionRepository;
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// Operation requires a logged-in session.
    NotAuthenticated,
    /// Required credential or profile field is blank.
    InvalidInput(&'static str),
    Remote(RemoteError),
    Storage(RepoError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not logged in"),
            Self::InvalidInput(field) => write!(f, "`{field}` must not be blank"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::NotAuthenticated | Self::InvalidInput(_) => None,
        }
    }
}

impl From<RemoteError> for SessionError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<DbError> for SessionError {
    fn from(value: DbError) -> Self {
        Self::Storage(RepoError::Db(value))
    }
}

pub struct SessionService {
    conn: SharedConnection,
    remote: Arc<dyn AuthRemote>,
    timeout: Duration,
    current: Mutex<SessionContext>,
}

impl SessionService {
    /// Loads the persisted session.
    pub fn new(
        conn: SharedConnection,
        remote: Arc<dyn AuthRemote>,
        timeout: Duration,
    ) -> SessionResult<Self> {
        let current = {
            let guard = db::lock(&conn)?;
            SqliteSessionRepository::new(&guard).load()?
        };
        Ok(Self {
            conn,
            remote,
            timeout,
            current: Mutex::new(current),
        })
    }

    pub async fn current(&self) -> SessionContext {
        self.current.lock().await.clone()
    }

    pub async fn login(&self, email: &str, password: &str) -> SessionResult<SessionContext> {
        let email = required("email", email)?;
        let password = non_blank("password", password)?;
        let mut current = self.current.lock().await;

        let session = with_timeout(self.timeout, self.remote.login(email, password)).await?;
        *current = self.persist_auth(session)?;
        info!(
            "event=session_login module=session status=ok user_id={}",
            current.user_id.unwrap_or_default()
        );
        Ok(current.clone())
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> SessionResult<SessionContext> {
        let email = required("email", email)?;
        let password = non_blank("password", password)?;
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let mut current = self.current.lock().await;

        let session = with_timeout(
            self.timeout,
            self.remote.register(email, password, display_name),
        )
        .await?;
        *current = self.persist_auth(session)?;
        info!(
            "event=session_register module=session status=ok user_id={}",
            current.user_id.unwrap_or_default()
        );
        Ok(current.clone())
    }

    /// Clears the local session. A failed remote logout is logged and does
    /// not keep the session alive.
    pub async fn logout(&self) -> SessionResult<()> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.token.clone().filter(|_| current.is_authenticated()) {
            if let Err(err) = with_timeout(self.timeout, self.remote.logout(&token)).await {
                warn!(
                    "event=session_logout module=session status=error error_code={}",
                    err.code()
                );
            }
        }

        {
            let conn = db::lock(&self.conn)?;
            SqliteSessionRepository::new(&conn).clear()?;
        }
        *current = SessionContext::default();
        info!("event=session_logout module=session status=ok");
        Ok(())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> SessionResult<SessionContext> {
        if update
            .email
            .as_deref()
            .is_some_and(|email| email.trim().is_empty())
        {
            return Err(SessionError::InvalidInput("email"));
        }
        let mut current = self.current.lock().await;
        let token = authenticated_token(&current)?;

        let profile =
            with_timeout(self.timeout, self.remote.update_profile(&token, &update)).await?;
        let mut next = current.clone();
        next.user_id = Some(profile.id);
        next.email = Some(profile.email);
        next.display_name = profile.display_name;
        self.save(&next)?;
        *current = next;
        Ok(current.clone())
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> SessionResult<()> {
        let current_password = non_blank("current_password", current_password)?;
        let new_password = non_blank("new_password", new_password)?;
        let current = self.current.lock().await;
        let token = authenticated_token(&current)?;

        with_timeout(
            self.timeout,
            self.remote
                .change_password(&token, current_password, new_password),
        )
        .await?;
        info!(
            "event=session_change_password module=session status=ok user_id={}",
            current.user_id.unwrap_or_default()
        );
        Ok(())
    }

    fn persist_auth(&self, session: AuthSession) -> SessionResult<SessionContext> {
        let context = SessionContext {
            token: Some(session.token),
            user_id: Some(session.user.id),
            email: Some(session.user.email),
            display_name: session.user.display_name,
        };
        self.save(&context)?;
        Ok(context)
    }

    fn save(&self, context: &SessionContext) -> SessionResult<()> {
        let conn = db::lock(&self.conn)?;
        SqliteSessionRepository::new(&conn).save(context)?;
        Ok(())
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> SessionResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidInput(field));
    }
    Ok(trimmed)
}

/// Like `required`, but passes the value through untrimmed.
fn non_blank<'a>(field: &'static str, value: &'a str) -> SessionResult<&'a str> {
    required(field, value).map(|_| value)
}

fn authenticated_token(context: &SessionContext) -> SessionResult<String> {
    context
        .token
        .clone()
        .filter(|_| context.is_authenticated())
        .ok_or(SessionError::NotAuthenticated)
}
