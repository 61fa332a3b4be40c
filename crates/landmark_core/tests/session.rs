use async_trait::async_trait;
use landmark_core::db::{open_db, share};
use landmark_core::remote::{AuthSession, ProfileUpdate, UserProfile};
use landmark_core::{AuthRemote, RemoteError, RemoteResult, SessionError, SessionService};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeAuth {
    fail_logout: bool,
    passwords: Mutex<Vec<(String, String)>>,
    logged_out: Mutex<Vec<String>>,
}

impl FakeAuth {
    fn session(email: &str, display_name: Option<&str>) -> AuthSession {
        AuthSession {
            token: format!("token-{email}"),
            user: UserProfile {
                id: 7,
                email: email.to_string(),
                display_name: display_name.map(str::to_string),
            },
        }
    }
}

#[async_trait]
impl AuthRemote for FakeAuth {
    async fn login(&self, email: &str, password: &str) -> RemoteResult<AuthSession> {
        if password != "secret" {
            return Err(RemoteError::Status {
                code: 401,
                message: "invalid credentials".to_string(),
            });
        }
        Ok(Self::session(email, None))
    }

    async fn register(
        &self,
        email: &str,
        _password: &str,
        display_name: Option<&str>,
    ) -> RemoteResult<AuthSession> {
        Ok(Self::session(email, display_name))
    }

    async fn logout(&self, token: &str) -> RemoteResult<()> {
        self.logged_out.lock().unwrap().push(token.to_string());
        if self.fail_logout {
            return Err(RemoteError::Unreachable("connection reset".to_string()));
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        _token: &str,
        update: &ProfileUpdate,
    ) -> RemoteResult<UserProfile> {
        Ok(UserProfile {
            id: 7,
            email: update
                .email
                .clone()
                .unwrap_or_else(|| "ada@example.com".to_string()),
            display_name: update.display_name.clone(),
        })
    }

    async fn change_password(
        &self,
        _token: &str,
        current_password: &str,
        new_password: &str,
    ) -> RemoteResult<()> {
        self.passwords
            .lock()
            .unwrap()
            .push((current_password.to_string(), new_password.to_string()));
        Ok(())
    }
}

fn service(auth: Arc<FakeAuth>, conn: landmark_core::SharedConnection) -> SessionService {
    let auth: Arc<dyn AuthRemote> = auth;
    SessionService::new(conn, auth, Duration::from_secs(1)).unwrap()
}

#[tokio::test]
async fn login_is_persisted_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("landmarks.db");
    let auth = Arc::new(FakeAuth::default());

    {
        let sessions = service(auth.clone(), share(open_db(&path).unwrap()));
        let context = sessions.login("  ada@example.com ", "secret").await.unwrap();
        assert_eq!(context.email.as_deref(), Some("ada@example.com"));
        assert_eq!(context.token.as_deref(), Some("token-ada@example.com"));
    }

    let reopened = service(auth, share(open_db(&path).unwrap()));
    let current = reopened.current().await;
    assert!(current.is_authenticated());
    assert_eq!(current.user_id, Some(7));
}

#[tokio::test]
async fn failed_login_keeps_previous_state() {
    let sessions = service(
        Arc::new(FakeAuth::default()),
        share(landmark_core::open_db_in_memory().unwrap()),
    );

    let err = sessions.login("ada@example.com", "wrong").await.unwrap_err();

    assert!(matches!(err, SessionError::Remote(RemoteError::Status { code: 401, .. })));
    assert!(!sessions.current().await.is_authenticated());
}

#[tokio::test]
async fn logout_clears_even_when_remote_fails() {
    let auth = Arc::new(FakeAuth {
        fail_logout: true,
        ..FakeAuth::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("landmarks.db");
    let sessions = service(auth.clone(), share(open_db(&path).unwrap()));
    sessions
        .register("ada@example.com", "secret", Some("  Ada "))
        .await
        .unwrap();
    assert_eq!(
        sessions.current().await.display_name.as_deref(),
        Some("Ada")
    );

    sessions.logout().await.unwrap();

    assert_eq!(sessions.current().await, Default::default());
    assert_eq!(
        *auth.logged_out.lock().unwrap(),
        vec!["token-ada@example.com".to_string()]
    );
    let reopened = service(auth, share(open_db(&path).unwrap()));
    assert!(!reopened.current().await.is_authenticated());
}

#[tokio::test]
async fn profile_calls_require_a_session() {
    let sessions = service(
        Arc::new(FakeAuth::default()),
        share(landmark_core::open_db_in_memory().unwrap()),
    );

    let err = sessions
        .update_profile(ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotAuthenticated));
    let err = sessions.change_password("old", "new").await.unwrap_err();
    assert!(matches!(err, SessionError::NotAuthenticated));
}

#[tokio::test]
async fn update_profile_replaces_stored_fields() {
    let sessions = service(
        Arc::new(FakeAuth::default()),
        share(landmark_core::open_db_in_memory().unwrap()),
    );
    sessions.login("ada@example.com", "secret").await.unwrap();

    let context = sessions
        .update_profile(ProfileUpdate {
            email: Some("countess@example.com".to_string()),
            display_name: Some("Countess".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(context.email.as_deref(), Some("countess@example.com"));
    assert_eq!(context.display_name.as_deref(), Some("Countess"));
    assert_eq!(context.token.as_deref(), Some("token-ada@example.com"));
}

#[tokio::test]
async fn blank_inputs_are_rejected_and_passwords_are_not_trimmed() {
    let auth = Arc::new(FakeAuth::default());
    let sessions = service(
        auth.clone(),
        share(landmark_core::open_db_in_memory().unwrap()),
    );

    assert!(matches!(
        sessions.login("   ", "secret").await,
        Err(SessionError::InvalidInput("email"))
    ));
    assert!(matches!(
        sessions.login("ada@example.com", "  ").await,
        Err(SessionError::InvalidInput("password"))
    ));

    sessions.login("ada@example.com", "secret").await.unwrap();
    assert!(matches!(
        sessions
            .update_profile(ProfileUpdate {
                email: Some(" ".to_string()),
                display_name: None,
            })
            .await,
        Err(SessionError::InvalidInput("email"))
    ));
    sessions.change_password(" old ", "new pass ").await.unwrap();
    assert_eq!(
        *auth.passwords.lock().unwrap(),
        vec![(" old ".to_string(), "new pass ".to_string())]
    );
}
