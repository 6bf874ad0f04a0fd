//! Bearer credentials attached to outgoing store requests.
//!
//! Token acquisition (login, registration) happens elsewhere; this module only
//! carries the result so the HTTP adapter never reads ambient state.

use serde::{Deserialize, Serialize};

/// Supplies the bearer token for the next request, if any.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// The user the current token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A logged-in user's JWT plus identity, as returned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub jwt: String,
    pub user: AuthUser,
}

/// Credentials for one client: the user's session when logged in, otherwise a
/// static API token.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    session: Option<AuthSession>,
    api_token: Option<String>,
}

impl AuthContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(mut self, session: AuthSession) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    #[must_use]
    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.user.id)
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.email.as_str())
    }
}

impl CredentialProvider for AuthContext {
    fn bearer_token(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|s| s.jwt.clone())
            .filter(|jwt| !jwt.is_empty())
            .or_else(|| self.api_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(jwt: &str) -> AuthSession {
        AuthSession {
            jwt: jwt.to_string(),
            user: AuthUser {
                id: 7,
                email: "ada@example.com".to_string(),
                username: None,
            },
        }
    }

    #[test]
    fn user_jwt_wins_over_api_token() {
        let ctx = AuthContext::anonymous()
            .with_api_token("static")
            .with_session(session("user-jwt"));
        assert_eq!(ctx.bearer_token().as_deref(), Some("user-jwt"));
        assert_eq!(ctx.user_id(), Some(7));
    }

    #[test]
    fn api_token_is_the_fallback() {
        let ctx = AuthContext::anonymous().with_api_token("static");
        assert_eq!(ctx.bearer_token().as_deref(), Some("static"));
        assert_eq!(ctx.user_id(), None);
    }

    #[test]
    fn blank_tokens_are_ignored() {
        let ctx = AuthContext::anonymous().with_api_token("  ");
        assert_eq!(ctx.bearer_token(), None);
    }

    #[test]
    fn session_deserializes_from_auth_payload() {
        let raw = r#"{"jwt":"abc","user":{"id":3,"email":"x@y.z"}}"#;
        let parsed: AuthSession = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.user.id, 3);
        assert_eq!(parsed.user.username, None);
    }
}
