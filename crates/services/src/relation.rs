//! Relation names and mutation shapes that differ between store deployments.
//!
//! Two things are not known up front: which attribute links an exam to its
//! students, and which relation-mutation payloads the store accepts. Both are
//! discovered by trying an ordered list of alternatives and moving on only for
//! failures that say "wrong name" or "wrong shape".

use std::future::Future;

use revise_core::model::DocumentId;
use storage::repository::{ExamQuery, ExamRepository, RelationField, RelationOp, StorageError};

/// Owner relation names seen across deployments, most likely first.
pub const DEFAULT_OWNER_CANDIDATES: [&str; 3] = ["eleves", "eleve", "students"];

/// Outcome of walking the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub field: RelationField,
    /// False when no candidate was accepted and `field` is only the default.
    pub confirmed: bool,
    /// Last failure that was not an unknown-key answer, if any.
    pub last_error: Option<StorageError>,
}

#[derive(Debug, Clone)]
pub struct RelationResolver {
    candidates: Vec<RelationField>,
}

impl Default for RelationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_OWNER_CANDIDATES.iter().map(|name| RelationField::new(*name)))
    }
}

impl RelationResolver {
    /// Falls back to the default owner candidates when `candidates` is empty.
    #[must_use]
    pub fn new(candidates: impl IntoIterator<Item = RelationField>) -> Self {
        let candidates: Vec<_> = candidates.into_iter().collect();
        if candidates.is_empty() {
            return Self::default();
        }
        Self { candidates }
    }

    #[must_use]
    pub fn candidates(&self) -> &[RelationField] {
        &self.candidates
    }

    /// Probe candidates in order and return the first one `probe` accepts.
    pub async fn resolve<F, Fut>(&self, mut probe: F) -> Resolution
    where
        F: FnMut(RelationField) -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        let mut last_error = None;
        for field in &self.candidates {
            match probe(field.clone()).await {
                Ok(()) => {
                    tracing::debug!(%field, "relation key accepted");
                    return Resolution {
                        field: field.clone(),
                        confirmed: true,
                        last_error,
                    };
                }
                Err(err) if err.is_invalid_key() => {
                    tracing::debug!(%field, "relation key unknown, trying next");
                }
                Err(err) => {
                    tracing::debug!(%field, error = %err, "relation probe failed, trying next");
                    last_error = Some(err);
                }
            }
        }

        let field = self.candidates[0].clone();
        tracing::warn!(%field, "no relation key accepted, using default");
        Resolution {
            field,
            confirmed: false,
            last_error,
        }
    }

    /// Find the relation that filters exams by owning user.
    pub async fn resolve_owner(&self, exams: &dyn ExamRepository, user_id: u64) -> Resolution {
        self.resolve(|field| {
            let query = ExamQuery::probe(field, user_id);
            async move { exams.list_exams(&query).await.map(|_| ()) }
        })
        .await
    }
}

//
// ─── MUTATION STRATEGIES ───────────────────────────────────────────────────────
//

/// Ways to attach new targets to a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    /// Additive `connect`.
    Connect,
    /// Read the current targets and `set` their union with the new ones.
    ReplaceWithUnion,
}

/// Ways to detach targets from a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkStrategy {
    Disconnect,
    /// `set` the relation to an empty list.
    Clear,
}

pub const LINK_STRATEGIES: [LinkStrategy; 2] =
    [LinkStrategy::Connect, LinkStrategy::ReplaceWithUnion];

pub const UNLINK_STRATEGIES: [UnlinkStrategy; 2] =
    [UnlinkStrategy::Disconnect, UnlinkStrategy::Clear];

/// Order-preserving union without duplicates.
#[must_use]
pub fn union_ids(current: &[DocumentId], added: &[DocumentId]) -> Vec<DocumentId> {
    let mut merged: Vec<DocumentId> = Vec::with_capacity(current.len() + added.len());
    for id in current.iter().chain(added) {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged
}

/// Attach `ids` to `relation` on `exam`, trying each link strategy in order.
///
/// # Errors
///
/// Returns the last `StorageError` once every strategy was refused, or the
/// first error that is not a shape rejection.
pub async fn link(
    exams: &dyn ExamRepository,
    exam: &DocumentId,
    relation: &RelationField,
    ids: &[DocumentId],
) -> Result<LinkStrategy, StorageError> {
    let mut refused = None;
    for strategy in LINK_STRATEGIES {
        let op = match strategy {
            LinkStrategy::Connect => RelationOp::Connect(ids.to_vec()),
            LinkStrategy::ReplaceWithUnion => {
                let current = exams.linked_ids(exam, relation).await?;
                RelationOp::Set(union_ids(&current, ids))
            }
        };
        match exams.update_relation(exam, relation, &op).await {
            Ok(()) => return Ok(strategy),
            Err(err) if err.is_shape_rejection() => {
                tracing::debug!(?strategy, %exam, error = %err, "link shape refused");
                refused = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(refused.unwrap_or(StorageError::NotFound))
}

/// Detach `ids` from `relation` on `exam`, trying each unlink strategy in order.
///
/// # Errors
///
/// Same contract as [`link`].
pub async fn unlink(
    exams: &dyn ExamRepository,
    exam: &DocumentId,
    relation: &RelationField,
    ids: &[DocumentId],
) -> Result<UnlinkStrategy, StorageError> {
    let mut refused = None;
    for strategy in UNLINK_STRATEGIES {
        let op = match strategy {
            UnlinkStrategy::Disconnect => RelationOp::Disconnect(ids.to_vec()),
            UnlinkStrategy::Clear => RelationOp::Set(Vec::new()),
        };
        match exams.update_relation(exam, relation, &op).await {
            Ok(()) => return Ok(strategy),
            Err(err) if err.is_shape_rejection() => {
                tracing::debug!(?strategy, %exam, error = %err, "unlink shape refused");
                refused = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(refused.unwrap_or(StorageError::NotFound))
}
