//! Conflict Engine: detects duplicates and contradictions between a newly
//! ingested chunk and the K nearest neighbors already in the vector index.
//!
//! Two tiers, per §4.4: the NLI cross-encoder adjudicates first; pairs it
//! leaves ambiguous (neither entailment nor contradiction crosses its
//! threshold) escalate to the generative verifier. All ambiguous pairs for
//! one document's analyze stage share a single semaphore so verifier
//! concurrency is bounded per document, not per chunk.

use crate::config::ConflictConfig;
use crate::model::{Chunk, Conflict, JudgedBy};
use crate::nli::{NliClient, NliScores};
use crate::vector_store::{SearchHit, VectorStore};
use crate::verifier::GenerativeVerifier;
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Runs the two-tier classification over one document's chunks against the
/// rest of the corpus, given each chunk's already-computed embedding.
pub struct ConflictEngine {
    config: ConflictConfig,
    vector_store: Arc<dyn VectorStore>,
    nli: Arc<dyn NliClient>,
    verifier: Arc<dyn GenerativeVerifier>,
}

impl ConflictEngine {
    pub fn new(
        config: ConflictConfig,
        vector_store: Arc<dyn VectorStore>,
        nli: Arc<dyn NliClient>,
        verifier: Arc<dyn GenerativeVerifier>,
    ) -> Self {
        Self { config, vector_store, nli, verifier }
    }

    /// Classify every chunk of a freshly embedded document against the
    /// corpus and return the conflicts found. Does not persist them; the
    /// caller is responsible for handing the result to the store.
    pub async fn analyze_document(
        &self,
        document_id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<Conflict>> {
        let mut decided = Vec::new();
        let mut ambiguous = Vec::new();

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let neighbors = self
                .vector_store
                .search(embedding, self.config.k_neighbors, Some(document_id))
                .await?;
            for neighbor in neighbors {
                match self.classify_pair(chunk, &neighbor).await? {
                    PairOutcome::Decided(conflict) => decided.push(conflict),
                    PairOutcome::Ambiguous { existing_chunk_id, existing_text, neighbor_sim } => {
                        ambiguous.push((chunk.clone(), existing_chunk_id, existing_text, neighbor_sim));
                    }
                    PairOutcome::NoConflict => {}
                }
            }
        }

        if !ambiguous.is_empty() {
            let permits = self.config.verifier_permits;
            let semaphore = Arc::new(Semaphore::new(permits));
            let verifier = Arc::clone(&self.verifier);

            let futures = ambiguous.into_iter().map(|(chunk, existing_chunk_id, existing_text, neighbor_sim)| {
                let semaphore = Arc::clone(&semaphore);
                let verifier = Arc::clone(&verifier);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    verify_ambiguous_pair(verifier.as_ref(), &existing_text, &chunk, existing_chunk_id, neighbor_sim).await
                }
            });

            let verdicts = join_all(futures).await;
            for verdict in verdicts.into_iter().flatten() {
                decided.push(verdict);
            }
        }

        Ok(decided)
    }

    async fn classify_pair(&self, chunk: &Chunk, neighbor: &SearchHit) -> Result<PairOutcome> {
        let logits = self.nli.predict(&neighbor.payload.text, &chunk.text).await?;
        let scores = NliScores::from_logits(logits);

        match scores.adjudicate(self.config.dedup_threshold, self.config.contradiction_threshold) {
            Some(label) => {
                let score = match label {
                    crate::model::ConflictLabel::Duplicate => scores.entailment,
                    crate::model::ConflictLabel::Contradiction => scores.contradiction,
                };
                Ok(PairOutcome::Decided(Conflict {
                    id: Uuid::new_v4(),
                    new_chunk_id: chunk.id,
                    existing_chunk_id: neighbor.id,
                    label,
                    score,
                    neighbor_sim: Some(neighbor.score),
                    judged_by: JudgedBy::Nli,
                    resolution_action: None,
                    resolved_at: None,
                    resolver_note: None,
                }))
            }
            None => {
                if scores.neutral >= self.config.neutral_threshold {
                    Ok(PairOutcome::NoConflict)
                } else {
                    Ok(PairOutcome::Ambiguous {
                        existing_chunk_id: neighbor.id,
                        existing_text: neighbor.payload.text.clone(),
                        neighbor_sim: neighbor.score,
                    })
                }
            }
        }
    }
}

enum PairOutcome {
    Decided(Conflict),
    Ambiguous { existing_chunk_id: Uuid, existing_text: String, neighbor_sim: f32 },
    NoConflict,
}

async fn verify_ambiguous_pair(
    verifier: &dyn GenerativeVerifier,
    existing_text: &str,
    chunk: &Chunk,
    existing_chunk_id: Uuid,
    neighbor_sim: f32,
) -> Option<Conflict> {
    let verdict = verifier.verify(existing_text, &chunk.text).await.ok()?;
    let label = verdict.label?;
    Some(Conflict {
        id: Uuid::new_v4(),
        new_chunk_id: chunk.id,
        existing_chunk_id,
        label,
        score: 1.0,
        neighbor_sim: Some(neighbor_sim),
        judged_by: JudgedBy::Llm,
        resolution_action: None,
        resolved_at: None,
        resolver_note: Some(verdict.reasoning),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CrateResult;
    use crate::vector_store::VectorPayload;
    use crate::verifier::VerifierVerdict;
    use async_trait::async_trait;

    struct FixedNli(f32, f32, f32);

    #[async_trait]
    impl NliClient for FixedNli {
        async fn predict(&self, _premise: &str, _hypothesis: &str) -> CrateResult<[f32; 3]> {
            Ok([self.0, self.1, self.2])
        }
    }

    struct FixedVectorStore(Vec<SearchHit>);

    #[async_trait]
    impl VectorStore for FixedVectorStore {
        async fn upsert(&self, _id: Uuid, _vector: Vec<f32>, _payload: VectorPayload) -> CrateResult<()> {
            Ok(())
        }
        async fn get_vector(&self, _id: Uuid) -> CrateResult<Option<Vec<f32>>> {
            Ok(None)
        }
        async fn search(
            &self,
            _vector: &[f32],
            _k: usize,
            _exclude_document_id: Option<Uuid>,
        ) -> CrateResult<Vec<SearchHit>> {
            Ok(self.0.clone())
        }
        async fn delete(&self, _ids: &[Uuid]) -> CrateResult<()> {
            Ok(())
        }
    }

    struct AlwaysNeutralVerifier;

    #[async_trait]
    impl GenerativeVerifier for AlwaysNeutralVerifier {
        async fn verify(&self, _premise: &str, _hypothesis: &str) -> CrateResult<VerifierVerdict> {
            Ok(VerifierVerdict { label: None, reasoning: "unrelated".to_string() })
        }
    }

    fn sample_chunk(document_id: Uuid) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            idx: 0,
            text: "the battery capacity is 5000 mAh".to_string(),
            hash: 1,
            page: None,
            section_path: None,
        }
    }

    #[tokio::test]
    async fn test_strong_contradiction_is_decided_by_nli() {
        let document_id = Uuid::new_v4();
        let chunk = sample_chunk(document_id);
        let neighbor_id = Uuid::new_v4();
        let hit = SearchHit {
            id: neighbor_id,
            score: 0.8,
            payload: VectorPayload { text: "the battery capacity is 3000 mAh".into(), document_id: Uuid::new_v4(), idx: 0 },
        };
        let engine = ConflictEngine::new(
            ConflictConfig::default(),
            Arc::new(FixedVectorStore(vec![hit])),
            Arc::new(FixedNli(6.0, -3.0, -3.0)),
            Arc::new(AlwaysNeutralVerifier),
        );
        let conflicts = engine
            .analyze_document(document_id, &[chunk], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].judged_by, JudgedBy::Nli);
        assert_eq!(conflicts[0].label, crate::model::ConflictLabel::Contradiction);
    }

    #[tokio::test]
    async fn test_neutral_scores_produce_no_conflict() {
        let document_id = Uuid::new_v4();
        let chunk = sample_chunk(document_id);
        let hit = SearchHit {
            id: Uuid::new_v4(),
            score: 0.5,
            payload: VectorPayload { text: "unrelated topic entirely".into(), document_id: Uuid::new_v4(), idx: 0 },
        };
        let engine = ConflictEngine::new(
            ConflictConfig::default(),
            Arc::new(FixedVectorStore(vec![hit])),
            Arc::new(FixedNli(-1.0, -1.0, 4.0)),
            Arc::new(AlwaysNeutralVerifier),
        );
        let conflicts = engine
            .analyze_document(document_id, &[chunk], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_pair_escalates_to_verifier() {
        let document_id = Uuid::new_v4();
        let chunk = sample_chunk(document_id);
        let hit = SearchHit {
            id: Uuid::new_v4(),
            score: 0.6,
            payload: VectorPayload { text: "somewhat related passage".into(), document_id: Uuid::new_v4(), idx: 0 },
        };
        let engine = ConflictEngine::new(
            ConflictConfig::default(),
            Arc::new(FixedVectorStore(vec![hit])),
            Arc::new(FixedNli(0.3, 0.3, 0.1)),
            Arc::new(AlwaysNeutralVerifier),
        );
        let conflicts = engine
            .analyze_document(document_id, &[chunk], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        assert!(conflicts.is_empty());
    }
}
