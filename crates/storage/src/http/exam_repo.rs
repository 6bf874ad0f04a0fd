use async_trait::async_trait;
use reqwest::Method;
use revise_core::model::{DocumentId, Exam, ExamChanges, NewExam};
use serde_json::Value;

use super::HttpRepository;
use super::mapping::{
    changes_body, data_node, exam_body, exam_from_node, linked_ids_from_node,
    pagination_from_meta, relation_body,
};
use super::query::{exam_detail_params, exam_list_params, linked_ids_params};
use crate::repository::{
    ExamPage, ExamQuery, ExamRepository, Pagination, RelationField, RelationOp, StorageError,
};

const EXAMS: &str = "exams";

impl HttpRepository {
    fn exam_from_body(&self, body: &Value) -> Result<Exam, StorageError> {
        exam_from_node(data_node(body)?, self.session_relation(), &[])
    }
}

#[async_trait]
impl ExamRepository for HttpRepository {
    async fn list_exams(&self, query: &ExamQuery) -> Result<ExamPage, StorageError> {
        let params = exam_list_params(query, self.session_relation());
        let url = self.endpoint(EXAMS, None)?;
        let body = self.send(Method::GET, url, Some(&params), None).await?;

        let exams = match body.get("data") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|node| exam_from_node(node, self.session_relation(), &query.populate_owners))
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(StorageError::Serialization(format!(
                    "expected a list of exams, got {other}"
                )));
            }
        };

        let fallback = Pagination::compute(
            query.page,
            query.page_size,
            u64::try_from(exams.len()).unwrap_or(u64::MAX),
        );
        Ok(ExamPage {
            pagination: pagination_from_meta(body.get("meta"), fallback),
            exams,
        })
    }

    async fn get_exam(&self, id: &DocumentId) -> Result<Exam, StorageError> {
        let params = exam_detail_params(self.session_relation());
        let url = self.endpoint(EXAMS, Some(id.as_str()))?;
        let body = self.send(Method::GET, url, Some(&params), None).await?;
        self.exam_from_body(&body)
    }

    async fn linked_ids(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
    ) -> Result<Vec<DocumentId>, StorageError> {
        let params = linked_ids_params(relation);
        let url = self.endpoint(EXAMS, Some(exam.as_str()))?;
        let body = self.send(Method::GET, url, Some(&params), None).await?;
        linked_ids_from_node(data_node(&body)?, relation)
    }

    async fn create_exam(&self, exam: &NewExam) -> Result<Exam, StorageError> {
        let url = self.endpoint(EXAMS, None)?;
        let body = self
            .send(Method::POST, url, None, Some(&exam_body(exam)))
            .await?;
        let created = self.exam_from_body(&body)?;
        tracing::info!(exam = %created.document_id(), name = created.name(), "exam created");
        Ok(created)
    }

    async fn update_exam(
        &self,
        id: &DocumentId,
        changes: &ExamChanges,
    ) -> Result<Exam, StorageError> {
        let url = self.endpoint(EXAMS, Some(id.as_str()))?;
        let body = self
            .send(Method::PUT, url, None, Some(&changes_body(changes)))
            .await?;
        self.exam_from_body(&body)
    }

    async fn delete_exam(&self, id: &DocumentId) -> Result<(), StorageError> {
        let url = self.endpoint(EXAMS, Some(id.as_str()))?;
        self.send(Method::DELETE, url, None, None).await?;
        Ok(())
    }

    async fn update_relation(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
        op: &RelationOp,
    ) -> Result<(), StorageError> {
        let url = self.endpoint(EXAMS, Some(exam.as_str()))?;
        self.send(Method::PUT, url, None, Some(&relation_body(relation, op)))
            .await?;
        Ok(())
    }
}
