//! Publish Pipeline: parse → chunk → embed → analyze → finalize.
//!
//! Each stage commits to the relational store before the next begins, so a
//! crash mid-publish leaves the document in a state `publish` can safely
//! resume from (§4.3): chunking is skipped if chunks already exist for the
//! document, and vector upserts are idempotent by chunk id.

use crate::chunker::Chunker;
use crate::conflict_engine::ConflictEngine;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::model::{Chunk, Conflict, Document, DocumentStatus};
use crate::object_store::{storage_key, ObjectStore};
use crate::parser;
use crate::store::Store;
use crate::vector_store::{VectorPayload, VectorStore};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One progress event of the streaming publish variant.
#[derive(Debug, Clone, Serialize)]
pub struct PublishEvent {
    pub stage: String,
    pub message: String,
    pub progress: u8,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PublishEvent {
    fn new(stage: &str, message: impl Into<String>, progress: u8) -> Self {
        Self { stage: stage.to_string(), message: message.into(), progress, ok: true, extra: None }
    }

    fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    fn error(message: impl Into<String>) -> Self {
        Self { stage: "error".to_string(), message: message.into(), progress: 0, ok: false, extra: None }
    }
}

/// Outcome of a non-streaming publish call.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub status: DocumentStatus,
    pub conflicts: Vec<Conflict>,
}

fn fingerprint(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, 0)
}

pub struct PublishPipeline {
    store: Arc<Store>,
    objects: Arc<dyn ObjectStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    chunker: Arc<Chunker>,
    conflict_engine: Arc<ConflictEngine>,
    max_upload_bytes: u64,
}

impl PublishPipeline {
    pub fn new(
        store: Arc<Store>,
        objects: Arc<dyn ObjectStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        chunker: Arc<Chunker>,
        conflict_engine: Arc<ConflictEngine>,
        max_upload_bytes: u64,
    ) -> Self {
        Self { store, objects, vectors, embedder, chunker, conflict_engine, max_upload_bytes }
    }

    /// Accept raw upload bytes, store them, and create a draft document row.
    ///
    /// If `external_ref` already has a document with an identical fingerprint,
    /// that existing document is returned with `duplicate=false` — it is the
    /// same upload, not a new one. If `external_ref` matches but the
    /// fingerprint differs, a *new* document row is created and `duplicate`
    /// is set true (the reference implementation's literal behavior).
    pub async fn ingest(
        &self,
        title: &str,
        external_ref: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<(Document, bool)> {
        if !parser::is_allowed_extension(extension) {
            return Err(Error::Unsupported(format!("extension not supported: {extension}")));
        }
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(Error::TooLarge(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_bytes
            )));
        }

        let hash = fingerprint(bytes);
        if let Some(existing) = self.store.find_document_by_ref_and_hash(external_ref, hash).await? {
            return Ok((existing, false));
        }

        let already_has_ref = self
            .store
            .list_documents()
            .await?
            .iter()
            .any(|d| d.external_ref == external_ref);

        let key = storage_key(title, hash, extension);
        self.objects.put(&key, bytes).await?;

        let document = Document {
            id: Uuid::new_v4(),
            title: title.to_string(),
            external_ref: external_ref.to_string(),
            file_hash: hash,
            storage_key: key,
            extension: extension.to_string(),
            status: DocumentStatus::Draft,
            created_at: Utc::now(),
            effective_at: None,
        };
        self.store.insert_document(&document).await?;
        Ok((document, already_has_ref))
    }

    /// Run the full pipeline to completion and return the final status.
    pub async fn publish(&self, document_id: Uuid) -> Result<PublishOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline_events = self.run(document_id, tx);
        let drain = async { while rx.recv().await.is_some() {} };
        let (result, ()) = tokio::join!(pipeline_events, drain);
        result?;

        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;
        let chunks = self.store.get_chunks_for_document(document_id).await?;
        let open = self.store.list_open_conflicts().await?;
        let conflicts = open
            .into_iter()
            .filter(|c| chunks.iter().any(|ch| ch.id == c.new_chunk_id || ch.id == c.existing_chunk_id))
            .collect();
        Ok(PublishOutcome { status: document.status, conflicts })
    }

    /// Streaming variant: returns a receiver yielding progress events at each
    /// stage boundary. The pipeline itself runs to completion on its own
    /// task regardless of whether the receiver is still held, so a dropped
    /// SSE client does not abort an in-flight publish.
    pub fn publish_stream(&self, document_id: Uuid) -> mpsc::UnboundedReceiver<PublishEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = self.clone_handles();
        tokio::spawn(async move {
            let tx2 = tx.clone();
            if let Err(e) = pipeline.run(document_id, tx).await {
                let _ = tx2.send(PublishEvent::error(e.to_string()));
            }
        });
        rx
    }

    fn clone_handles(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            objects: Arc::clone(&self.objects),
            vectors: Arc::clone(&self.vectors),
            embedder: Arc::clone(&self.embedder),
            chunker: Arc::clone(&self.chunker),
            conflict_engine: Arc::clone(&self.conflict_engine),
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    async fn run(&self, document_id: Uuid, tx: mpsc::UnboundedSender<PublishEvent>) -> Result<()> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;

        if !document.status.can_transition_to(DocumentStatus::Published) {
            let already_published = document.status == DocumentStatus::Published;
            let message = if already_published {
                "document already published"
            } else {
                "document is not eligible for publishing from its current status"
            };
            let _ = tx.send(
                PublishEvent::new("complete", message, 100)
                    .with_extra(json!({ "already_published": already_published })),
            );
            return Ok(());
        }

        let _ = tx.send(PublishEvent::new("parsing", "reading and decoding the upload", 0));
        let bytes = self.objects.get(&document.storage_key).await?;
        let text = parser::parse_bytes(&document.extension, &bytes, false)?;
        let _ = tx.send(
            PublishEvent::new("parsed", "decoded to normalized text", 20)
                .with_extra(json!({ "text_length": text.len() })),
        );

        let _ = tx.send(PublishEvent::new("chunking", "splitting into token-bounded chunks", 20));
        let existing = self.store.get_chunks_for_document(document_id).await?;
        let chunks = if !existing.is_empty() {
            existing
        } else if text.trim().is_empty() {
            Vec::new()
        } else {
            let pieces = self.chunker.split(&text);
            let chunks: Vec<Chunk> = pieces
                .into_iter()
                .enumerate()
                .map(|(idx, piece)| Chunk {
                    id: Uuid::new_v4(),
                    document_id,
                    idx: idx as i64,
                    hash: fingerprint(piece.as_bytes()),
                    text: piece,
                    page: None,
                    section_path: None,
                })
                .collect();
            self.store.insert_chunks(&chunks).await?;
            chunks
        };
        let _ = tx.send(
            PublishEvent::new("chunked", "chunks committed", 40)
                .with_extra(json!({ "chunk_count": chunks.len() })),
        );

        let _ = tx.send(PublishEvent::new("embedding", "computing chunk embeddings", 40));
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self.embedder.embed(&chunk.text).await?;
            self.vectors
                .upsert(
                    chunk.id,
                    vector.clone(),
                    VectorPayload { text: chunk.text.clone(), document_id, idx: chunk.idx },
                )
                .await?;
            embeddings.push(vector);
        }
        let _ = tx.send(PublishEvent::new("embedded", "embeddings indexed", 70));

        let _ = tx.send(PublishEvent::new("analyzing", "checking for duplicates and contradictions", 75));
        let conflicts = if chunks.is_empty() {
            Vec::new()
        } else {
            self.conflict_engine.analyze_document(document_id, &chunks, &embeddings).await?
        };
        let persisted = self.store.insert_conflicts(&conflicts).await?;
        let _ = tx.send(
            PublishEvent::new("analyzed", "conflict analysis complete", 90)
                .with_extra(json!({ "conflict_count": persisted.len() })),
        );

        if persisted.is_empty() {
            self.store
                .set_document_status(document_id, DocumentStatus::Published, Some(Utc::now()))
                .await?;
            let _ = tx.send(
                PublishEvent::new("complete", "document published", 100)
                    .with_extra(json!({ "conflict_count": 0 })),
            );
        } else {
            self.store.set_document_status(document_id, DocumentStatus::PendingReview, None).await?;
            let _ = tx.send(
                PublishEvent::new("conflicts_detected", "open conflicts require review", 95)
                    .with_extra(json!({ "conflict_count": persisted.len() })),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictConfig;
    use crate::embedding::HashEmbeddingClient;
    use crate::nli::NliClient;
    use crate::object_store::FsObjectStore;
    use crate::verifier::{GenerativeVerifier, VerifierVerdict};
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;

    struct NeverConflictNli;

    #[async_trait]
    impl NliClient for NeverConflictNli {
        async fn predict(&self, _premise: &str, _hypothesis: &str) -> Result<[f32; 3]> {
            Ok([-3.0, -3.0, 6.0])
        }
    }

    struct NeverConflictVerifier;

    #[async_trait]
    impl GenerativeVerifier for NeverConflictVerifier {
        async fn verify(&self, _premise: &str, _hypothesis: &str) -> Result<VerifierVerdict> {
            Ok(VerifierVerdict { label: None, reasoning: "n/a".to_string() })
        }
    }

    async fn build_pipeline(dir: &tempfile::TempDir) -> PublishPipeline {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        let objects = Arc::new(FsObjectStore::new(dir.path()));
        let vectors: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::connect("sqlite::memory:").await.unwrap());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(HashEmbeddingClient::new(32));
        let chunker = Arc::new(Chunker::new(200, 25).unwrap());
        let conflict_engine = Arc::new(ConflictEngine::new(
            ConflictConfig::default(),
            Arc::clone(&vectors),
            Arc::new(NeverConflictNli),
            Arc::new(NeverConflictVerifier),
        ));
        PublishPipeline::new(store, objects, vectors, embedder, chunker, conflict_engine, 10 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_ingest_then_publish_reaches_published_with_no_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&dir).await;

        let (doc, duplicate) = pipeline
            .ingest("battery-spec", "battery-spec.txt", "txt", b"The battery has a 5000 mAh capacity.")
            .await
            .unwrap();
        assert!(!duplicate);

        let outcome = pipeline.publish(doc.id).await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Published);
        assert!(outcome.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_reingest_identical_bytes_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&dir).await;

        let (first, _) = pipeline.ingest("spec", "spec.txt", "txt", b"identical content").await.unwrap();
        let (second, duplicate) = pipeline.ingest("spec", "spec.txt", "txt", b"identical content").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(!duplicate);
    }

    #[tokio::test]
    async fn test_blank_upload_publishes_with_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&dir).await;
        let (doc, _) = pipeline.ingest("empty", "empty.txt", "txt", b"   ").await.unwrap();
        let outcome = pipeline.publish(doc.id).await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Published);
        assert!(outcome.conflicts.is_empty());
        assert!(pipeline.store.get_chunks_for_document(doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_republishing_published_document_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&dir).await;
        let (doc, _) = pipeline
            .ingest("spec", "spec.txt", "txt", b"The battery has a 5000 mAh capacity.")
            .await
            .unwrap();

        let first = pipeline.publish(doc.id).await.unwrap();
        assert_eq!(first.status, DocumentStatus::Published);
        let chunks_after_first = pipeline.store.get_chunks_for_document(doc.id).await.unwrap();
        let effective_at_first = pipeline.store.get_document(doc.id).await.unwrap().unwrap().effective_at;

        let second = pipeline.publish(doc.id).await.unwrap();
        assert_eq!(second.status, DocumentStatus::Published);
        let chunks_after_second = pipeline.store.get_chunks_for_document(doc.id).await.unwrap();
        assert_eq!(chunks_after_first.len(), chunks_after_second.len());
        let effective_at_second = pipeline.store.get_document(doc.id).await.unwrap().unwrap().effective_at;
        assert_eq!(effective_at_first, effective_at_second);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = build_pipeline(&dir).await;
        pipeline.max_upload_bytes = 4;
        let err = pipeline.ingest("big", "big.txt", "txt", b"way too large").await;
        assert!(matches!(err, Err(Error::TooLarge(_))));
    }

    /// Driven with `tokio_test::block_on` rather than the `#[tokio::test]`
    /// attribute to exercise the streaming variant outside the usual
    /// per-test runtime, confirming the background `tokio::spawn` in
    /// `publish_stream` still runs to completion on a bare current-thread
    /// runtime.
    #[test]
    fn test_publish_stream_emits_stages_in_order_ending_complete() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let pipeline = build_pipeline(&dir).await;
            let (doc, _) = pipeline
                .ingest("notice", "notice.txt", "txt", b"The device ships in the first quarter.")
                .await
                .unwrap();

            let mut rx = pipeline.publish_stream(doc.id);
            let mut stages = Vec::new();
            while let Some(event) = rx.recv().await {
                stages.push(event.stage.clone());
            }

            assert_eq!(stages.first().map(String::as_str), Some("parsing"));
            assert_eq!(stages.last().map(String::as_str), Some("complete"));
            assert!(stages.iter().all(|s| s != "error"));
        });
    }
}
