use async_trait::async_trait;
use reqwest::Method;
use revise_core::model::{DocumentId, NewSession, StudySession};

use super::HttpRepository;
use super::mapping::{data_node, session_body, session_from_node};
use crate::repository::{SessionRepository, StorageError};

const SESSIONS: &str = "sessions";

#[async_trait]
impl SessionRepository for HttpRepository {
    async fn create_session(&self, session: &NewSession) -> Result<StudySession, StorageError> {
        let url = self.endpoint(SESSIONS, None)?;
        let body = self
            .send(Method::POST, url, None, Some(&session_body(session)))
            .await?;
        session_from_node(data_node(&body)?)
    }

    async fn delete_session(&self, id: &DocumentId) -> Result<(), StorageError> {
        let url = self.endpoint(SESSIONS, Some(id.as_str()))?;
        self.send(Method::DELETE, url, None, None).await?;
        Ok(())
    }
}
