use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::auth::CredentialProvider;
use crate::repository::{RelationField, Storage, StorageError};

mod error;
mod exam_repo;
mod mapping;
mod query;
mod session_repo;

use query::QueryParams;

pub const DEFAULT_SESSION_RELATION: &str = "sessions";

/// Connection settings for the REST store.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Root of the store, without the `/api` suffix.
    pub base_url: Url,
    pub timeout: Option<Duration>,
    /// Relation on exams holding their study sessions.
    pub session_relation: RelationField,
}

impl HttpConfig {
    /// # Errors
    ///
    /// Returns `HttpInitError::InvalidBaseUrl` if `base_url` does not parse or
    /// cannot carry paths.
    pub fn new(base_url: &str) -> Result<Self, HttpInitError> {
        let mut url = Url::parse(base_url).map_err(|e| HttpInitError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(HttpInitError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "not a base url".into(),
            });
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            base_url: url,
            timeout: Some(Duration::from_secs(15)),
            session_relation: RelationField::new(DEFAULT_SESSION_RELATION),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_relation(mut self, relation: RelationField) -> Self {
        self.session_relation = relation;
        self
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpInitError {
    #[error("invalid base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

/// REST adapter speaking the store's `/api` collections.
#[derive(Clone)]
pub struct HttpRepository {
    client: Client,
    base: Url,
    credentials: Arc<dyn CredentialProvider>,
    session_relation: RelationField,
}

impl HttpRepository {
    /// # Errors
    ///
    /// Returns `HttpInitError::Client` if the HTTP client cannot be built.
    pub fn new(
        config: HttpConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, HttpInitError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base: config.base_url,
            credentials,
            session_relation: config.session_relation,
        })
    }

    #[must_use]
    pub fn session_relation(&self) -> &RelationField {
        &self.session_relation
    }

    /// `<base>/api/<collection>[/<id>]`
    fn endpoint(&self, collection: &str, id: Option<&str>) -> Result<Url, StorageError> {
        let path = match id {
            Some(id) => format!("api/{collection}/{id}"),
            None => format!("api/{collection}"),
        };
        self.base
            .join(&path)
            .map_err(|e| StorageError::Connection(format!("bad endpoint {path}: {e}")))
    }

    /// Send one request and return the parsed JSON body (`Null` for empty
    /// bodies).
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: Option<&QueryParams>,
        body: Option<&Value>,
    ) -> Result<Value, StorageError> {
        tracing::debug!(%method, path = url.path(), "store request");

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            request = request.query(params.pairs());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| error::transport(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| error::transport(&e))?;

        if !status.is_success() {
            let err = error::classify(status, &text);
            tracing::debug!(%method, path = url.path(), status = status.as_u16(), error = %err, "store refused request");
            return Err(err);
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl Storage {
    /// Build a `Storage` backed by the REST store.
    ///
    /// # Errors
    ///
    /// Returns `HttpInitError` if the HTTP client cannot be built.
    pub fn http(
        config: HttpConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, HttpInitError> {
        Ok(Self::from_repo(HttpRepository::new(config, credentials)?))
    }
}
