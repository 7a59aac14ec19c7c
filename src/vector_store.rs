//! Vector Index Gateway: upsert, query, and delete dense vectors with
//! payload, keyed by the owning chunk's id.
//!
//! The reference configuration uses a single collection, `chunks`, cosine
//! distance, dimension 384. This implementation stores points in SQLite as
//! little-endian `f32` blobs and does a brute-force cosine scan, the same
//! approach the teacher's `SqliteMemoryStore` uses for its vector memory —
//! adequate for a bounded, single-tenant corpus and swappable behind the
//! trait for a production ANN index.

use crate::error::{Error, IndexError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

/// Payload carried alongside each vector point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub text: String,
    pub document_id: Uuid,
    pub idx: i64,
}

/// A neighbor returned from [`VectorStore::search`].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Abstracts over the dense vector index so the Conflict Engine and publish
/// pipeline do not depend on a concrete backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: Uuid, vector: Vec<f32>, payload: VectorPayload) -> Result<()>;

    async fn get_vector(&self, id: Uuid) -> Result<Option<Vec<f32>>>;

    /// K nearest neighbors by cosine similarity, excluding points whose
    /// `document_id` equals `exclude_document_id` when set.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        exclude_document_id: Option<Uuid>,
    ) -> Result<Vec<SearchHit>>;

    async fn delete(&self, ids: &[Uuid]) -> Result<()>;
}

/// SQLite-backed implementation of [`VectorStore`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(Error::Io)?;
                    }
                }
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_points (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                text TEXT NOT NULL,
                idx INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(Error::Database)?;
        Ok(Self { pool })
    }

    fn serialize_embedding(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, id: Uuid, vector: Vec<f32>, payload: VectorPayload) -> Result<()> {
        let blob = Self::serialize_embedding(&vector);
        sqlx::query(
            "INSERT INTO vector_points (id, document_id, text, idx, embedding) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET document_id = excluded.document_id, text = excluded.text, idx = excluded.idx, embedding = excluded.embedding",
        )
        .bind(id.to_string())
        .bind(payload.document_id.to_string())
        .bind(&payload.text)
        .bind(payload.idx)
        .bind(blob)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Index(IndexError::UpsertFailed(e.to_string())))?;
        Ok(())
    }

    async fn get_vector(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query("SELECT embedding FROM vector_points WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Index(IndexError::SearchFailed(e.to_string())))?;
        Ok(row.map(|r| Self::deserialize_embedding(&r.get::<Vec<u8>, _>("embedding"))))
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        exclude_document_id: Option<Uuid>,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query("SELECT id, document_id, text, idx, embedding FROM vector_points")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Index(IndexError::SearchFailed(e.to_string())))?;

        let mut scored: Vec<SearchHit> = rows
            .iter()
            .filter_map(|r| {
                let document_id =
                    Uuid::parse_str(&r.get::<String, _>("document_id")).unwrap_or_default();
                if let Some(exclude) = exclude_document_id {
                    if document_id == exclude {
                        return None;
                    }
                }
                let id = Uuid::parse_str(&r.get::<String, _>("id")).ok()?;
                let embedding = Self::deserialize_embedding(&r.get::<Vec<u8>, _>("embedding"));
                let score = Self::cosine_similarity(vector, &embedding);
                Some(SearchHit {
                    id,
                    score,
                    payload: VectorPayload {
                        text: r.get("text"),
                        document_id,
                        idx: r.get("idx"),
                    },
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM vector_points WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Index(IndexError::DeleteFailed(e.to_string())))?;
        }
        Ok(())
    }
}

/// L2-normalize a vector in place so stored points satisfy the "unit vector"
/// invariant of the data model.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(document_id: Uuid, text: &str) -> VectorPayload {
        VectorPayload {
            text: text.to_string(),
            document_id,
            idx: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_vector() {
        let store = SqliteVectorStore::connect("sqlite::memory:").await.unwrap();
        let id = Uuid::new_v4();
        let doc_id = Uuid::new_v4();
        store
            .upsert(id, vec![1.0, 0.0, 0.0], payload(doc_id, "hello"))
            .await
            .unwrap();

        let vector = store.get_vector(id).await.unwrap().unwrap();
        assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_point() {
        let store = SqliteVectorStore::connect("sqlite::memory:").await.unwrap();
        let id = Uuid::new_v4();
        let doc_id = Uuid::new_v4();
        store
            .upsert(id, vec![1.0, 0.0], payload(doc_id, "first"))
            .await
            .unwrap();
        store
            .upsert(id, vec![0.0, 1.0], payload(doc_id, "second"))
            .await
            .unwrap();

        let vector = store.get_vector(id).await.unwrap().unwrap();
        assert_eq!(vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_search_excludes_same_document_and_orders_by_score() {
        let store = SqliteVectorStore::connect("sqlite::memory:").await.unwrap();
        let this_doc = Uuid::new_v4();
        let other_doc = Uuid::new_v4();

        store
            .upsert(Uuid::new_v4(), vec![1.0, 0.0], payload(this_doc, "same doc"))
            .await
            .unwrap();
        store
            .upsert(Uuid::new_v4(), vec![1.0, 0.0], payload(other_doc, "near"))
            .await
            .unwrap();
        store
            .upsert(Uuid::new_v4(), vec![0.0, 1.0], payload(other_doc, "far"))
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10, Some(this_doc)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.text, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_delete_removes_point() {
        let store = SqliteVectorStore::connect("sqlite::memory:").await.unwrap();
        let id = Uuid::new_v4();
        store
            .upsert(id, vec![1.0], payload(Uuid::new_v4(), "x"))
            .await
            .unwrap();
        store.delete(&[id]).await.unwrap();
        assert!(store.get_vector(id).await.unwrap().is_none());
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
