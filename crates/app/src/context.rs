use std::sync::Arc;

use anyhow::Context;
use services::{Clock, ExamBoard, ExamService, PlanService, RelationResolver};
use storage::auth::{AuthContext, AuthSession, AuthUser};
use storage::http::HttpConfig;
use storage::repository::{RelationField, Storage};

use crate::config::AppConfig;

/// Services wired against the configured store.
pub struct AppContext {
    pub exams: ExamService,
    pub board: ExamBoard,
    pub user_id: Option<u64>,
}

impl AppContext {
    /// # Errors
    ///
    /// Fails on an invalid base URL or plan offset, or when the HTTP client
    /// cannot be built.
    pub fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let zone = config.plan.zone()?;
        let sessions = RelationField::new(config.relations.sessions.as_str());

        let http = HttpConfig::new(&config.api.base_url)
            .context("invalid api.base_url")?
            .with_timeout(config.api.timeout())
            .with_session_relation(sessions.clone());

        let auth = auth_context(config);
        let user_id = auth.user_id().or(config.auth.user_id);
        let storage = Storage::http(http, Arc::new(auth)).context("failed to build HTTP client")?;

        let plans = PlanService::new(
            Clock::default_clock(),
            Arc::clone(&storage.exams),
            Arc::clone(&storage.sessions),
        )
        .with_zone(zone)
        .with_session_relation(sessions);
        let resolver = RelationResolver::new(
            config
                .relations
                .owner_candidates
                .iter()
                .map(|name| RelationField::new(name.as_str())),
        );

        Ok(Self {
            exams: ExamService::new(Arc::clone(&storage.exams)),
            board: ExamBoard::new(Arc::clone(&storage.exams), plans, resolver),
            user_id,
        })
    }
}

/// A user JWT needs a user id to be usable as a session; otherwise only the
/// static token is sent.
fn auth_context(config: &AppConfig) -> AuthContext {
    let auth = AuthContext::anonymous().with_api_token(config.api.token.as_str());
    match config.auth.user_id {
        Some(id) if !config.auth.jwt.trim().is_empty() => auth.with_session(AuthSession {
            jwt: config.auth.jwt.clone(),
            user: AuthUser {
                id,
                email: config.auth.email.clone(),
                username: None,
            },
        }),
        _ => auth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::auth::CredentialProvider;

    #[test]
    fn jwt_with_user_id_becomes_session() {
        let mut config = AppConfig::default();
        config.api.token = "static".into();
        config.auth.jwt = "user-jwt".into();
        config.auth.user_id = Some(5);
        let auth = auth_context(&config);
        assert_eq!(auth.bearer_token().as_deref(), Some("user-jwt"));
        assert_eq!(auth.user_id(), Some(5));
    }

    #[test]
    fn jwt_without_user_id_is_ignored() {
        let mut config = AppConfig::default();
        config.api.token = "static".into();
        config.auth.jwt = "user-jwt".into();
        let auth = auth_context(&config);
        assert_eq!(auth.bearer_token().as_deref(), Some("static"));
    }

    #[test]
    fn default_config_builds_a_context() {
        let ctx = AppContext::init(&AppConfig::default()).unwrap();
        assert_eq!(ctx.user_id, None);
    }
}
