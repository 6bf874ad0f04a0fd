//! Layered configuration for the `revise` binary.
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `~/.config/revise/config.toml`
//! 3. `./revise.toml`
//! 4. `REVISE_*` environment variables, `__` between sections
//!    (`REVISE_API__BASE_URL` -> `api.base_url`)
//!
//! Command-line flags are applied on top by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use revise_core::planner::PlanZone;
use services::relation::DEFAULT_OWNER_CANDIDATES;

pub const LOCAL_CONFIG_FILE: &str = "revise.toml";
pub const ENV_PREFIX: &str = "REVISE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Store root, without `/api`.
    pub base_url: String,
    /// Static API token used when no user JWT is configured.
    #[serde(default)]
    pub token: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1337".to_string(),
            token: String::new(),
            timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    /// `None` disables the client timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// The logged-in user, as issued by the store's auth endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt: String,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelationsConfig {
    /// Owner relation names to probe, in order.
    pub owner_candidates: Vec<String>,
    pub sessions: String,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            owner_candidates: DEFAULT_OWNER_CANDIDATES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            sessions: "sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlanConfig {
    /// Pin sessions to this UTC offset instead of the machine's zone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl PlanConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for offsets beyond ±24h.
    pub fn zone(&self) -> Result<PlanZone, ConfigError> {
        match self.utc_offset_minutes {
            None => Ok(PlanZone::Local),
            Some(minutes) => {
                PlanZone::from_offset_minutes(minutes).ok_or_else(|| ConfigError::InvalidValue {
                    field: "plan.utc_offset_minutes".into(),
                    reason: format!("{minutes} is out of range"),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub plan: PlanConfig,
}

impl AppConfig {
    /// Load from defaults, config files and the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` when a source cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment().extract()?)
    }

    /// Same as [`AppConfig::load`], after reading `.env` from the working
    /// directory when one exists.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            tracing::warn!(error = %err, "ignoring unreadable .env file");
        }
        Self::load()
    }

    #[must_use]
    pub fn figment() -> Figment {
        Self::figment_from(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG_FILE),
        )
    }

    /// Provider chain with explicit file locations.
    #[must_use]
    pub fn figment_from(global: Option<&Path>, local: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(global) = global.filter(|p| p.exists()) {
            figment = figment.merge(Toml::file(global));
        }
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("revise").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    fn extract() -> Result<AppConfig, figment::Error> {
        AppConfig::figment_from(None, Path::new(LOCAL_CONFIG_FILE)).extract()
    }

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = extract()?;
            assert_eq!(config.api.base_url, "http://localhost:1337");
            assert_eq!(config.api.timeout(), Some(Duration::from_secs(15)));
            assert_eq!(
                config.relations.owner_candidates,
                vec!["eleves", "eleve", "students"]
            );
            assert_eq!(config.relations.sessions, "sessions");
            assert_eq!(config.auth.user_id, None);
            assert!(matches!(config.plan.zone(), Ok(PlanZone::Local)));
            Ok(())
        });
    }

    #[test]
    fn local_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                LOCAL_CONFIG_FILE,
                r#"
[api]
base_url = "https://cms.school.test"
timeout_secs = 0

[relations]
owner_candidates = ["students"]

[plan]
utc_offset_minutes = 120
"#,
            )?;
            let config = extract()?;
            assert_eq!(config.api.base_url, "https://cms.school.test");
            assert_eq!(config.api.timeout(), None);
            assert_eq!(config.relations.owner_candidates, vec!["students"]);
            assert_eq!(
                config.plan.zone().ok(),
                PlanZone::from_offset_minutes(120)
            );
            Ok(())
        });
    }

    #[test]
    fn env_beats_file() {
        Jail::expect_with(|jail| {
            jail.create_file(LOCAL_CONFIG_FILE, "[auth]\nuser_id = 3\n")?;
            jail.set_env("REVISE_AUTH__USER_ID", "42");
            jail.set_env("REVISE_API__TOKEN", "tok");
            let config = extract()?;
            assert_eq!(config.auth.user_id, Some(42));
            assert_eq!(config.api.token, "tok");
            Ok(())
        });
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let plan = PlanConfig {
            utc_offset_minutes: Some(24 * 60 + 1),
        };
        assert!(matches!(
            plan.zone(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
