//! Resolution Controller: human adjudication of open conflicts.
//!
//! Grounded in the reference `resolve_conflict`/`resolve_all_conflicts`
//! handlers: mark the conflict resolved before touching the index, best-effort
//! delete the losing chunk's vector point (a missing point is not fatal),
//! delete it from the relational store, then attempt to auto-publish the
//! owning document if no open conflicts remain on either side of the pair.

use crate::error::{Error, Result};
use crate::model::{Conflict, DocumentStatus, ResolutionAction};
use crate::store::Store;
use crate::vector_store::VectorStore;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use tracing::warn;

pub struct ResolutionController {
    store: Arc<Store>,
    vectors: Arc<dyn VectorStore>,
}

/// Which chunk resolving a conflict kept and which it removed from the
/// corpus, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionResult {
    pub conflict_id: Uuid,
    pub action: ResolutionAction,
    pub kept_chunk_id: Uuid,
    pub removed_chunk_id: Option<Uuid>,
    pub auto_published_document: Option<Uuid>,
}

impl ResolutionController {
    pub fn new(store: Arc<Store>, vectors: Arc<dyn VectorStore>) -> Self {
        Self { store, vectors }
    }

    /// Resolve one conflict. `supersede` keeps the new chunk and removes the
    /// existing (older) one; `ignore` keeps the existing chunk and removes
    /// the new one.
    pub async fn resolve(
        &self,
        conflict_id: Uuid,
        action: ResolutionAction,
        note: &str,
    ) -> Result<ResolutionResult> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !conflict.is_open() {
            return Err(Error::Conflict(format!("conflict {conflict_id} is already resolved")));
        }

        self.store.resolve_conflict(conflict_id, action, note).await?;

        let (kept_chunk_id, removed_chunk_id) = match action {
            ResolutionAction::Supersede => {
                self.remove_chunk(conflict.existing_chunk_id).await;
                (conflict.new_chunk_id, conflict.existing_chunk_id)
            }
            ResolutionAction::Ignore => {
                self.remove_chunk(conflict.new_chunk_id).await;
                (conflict.existing_chunk_id, conflict.new_chunk_id)
            }
        };

        let document_id = self.owning_document(kept_chunk_id).await?;
        let auto_published_document = self.try_auto_publish(document_id).await?;

        Ok(ResolutionResult {
            conflict_id,
            action,
            kept_chunk_id,
            removed_chunk_id: Some(removed_chunk_id),
            auto_published_document,
        })
    }

    /// Resolve every currently open conflict with the same action, then
    /// attempt to auto-publish each distinct document touched.
    pub async fn resolve_all(&self, action: ResolutionAction, note: &str) -> Result<Vec<ResolutionResult>> {
        let open = self.store.list_open_conflicts().await?;
        let mut results = Vec::with_capacity(open.len());
        for conflict in open {
            match self.resolve(conflict.id, action, note).await {
                Ok(result) => results.push(result),
                Err(e) => warn!(conflict_id = %conflict.id, error = %e, "bulk resolution skipped a conflict"),
            }
        }
        Ok(results)
    }

    async fn remove_chunk(&self, chunk_id: Uuid) {
        if let Err(e) = self.vectors.delete(&[chunk_id]).await {
            warn!(%chunk_id, error = %e, "vector point delete failed during resolution; continuing");
        }
        if let Err(e) = self.store.delete_chunk(chunk_id).await {
            warn!(%chunk_id, error = %e, "relational chunk delete failed during resolution");
        }
    }

    /// Auto-publish targets whichever document owns the chunk the resolution
    /// kept: the new document for `supersede`, the existing chunk's document
    /// for `ignore`.
    async fn owning_document(&self, kept_chunk_id: Uuid) -> Result<Uuid> {
        let chunk = self
            .store
            .get_chunk(kept_chunk_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chunk {kept_chunk_id}")))?;
        Ok(chunk.document_id)
    }

    /// Publish `document_id` if it is still pending review and no open
    /// conflict references any of its chunks on either side (§9, the
    /// broader-check resolution of the idle Open Question).
    async fn try_auto_publish(&self, document_id: Uuid) -> Result<Option<Uuid>> {
        let document = match self.store.get_document(document_id).await? {
            Some(d) => d,
            None => return Ok(None),
        };
        if document.status != DocumentStatus::PendingReview {
            return Ok(None);
        }
        if self.store.has_open_conflicts_for_document(document_id).await? {
            return Ok(None);
        }
        self.store
            .set_document_status(document_id, DocumentStatus::Published, Some(Utc::now()))
            .await?;
        Ok(Some(document_id))
    }
}
