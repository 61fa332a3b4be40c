//! Authenticated session context.

use serde::{Deserialize, Serialize};

/// Explicit session state passed to components that talk to the auth surface.
///
/// Persisted through `SqliteSessionRepository`; there is no ambient global copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl SessionContext {
    pub fn is_authenticated(&self) -> bool {
        self.token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}
