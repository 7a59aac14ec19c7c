//! NLI Client: scores a (new-chunk, existing-chunk) pair across the three
//! entailment classes and reduces the raw logits to a label with `softmax`.
//!
//! Label order is pinned to `[contradiction, entailment, neutral]` to match
//! the cross-encoder checkpoint the reference stack was tuned against —
//! this order is load-bearing and must not be re-derived from the model's
//! own output ordering.

use crate::error::{Error, ModelError, Result};
use crate::model::ConflictLabel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Index of each class within the pinned logits ordering.
const CONTRADICTION_IDX: usize = 0;
const ENTAILMENT_IDX: usize = 1;
const NEUTRAL_IDX: usize = 2;

/// Softmax probabilities over `[contradiction, entailment, neutral]`.
#[derive(Debug, Clone, Copy)]
pub struct NliScores {
    pub contradiction: f32,
    pub entailment: f32,
    pub neutral: f32,
}

impl NliScores {
    pub fn from_logits(logits: [f32; 3]) -> Self {
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        Self {
            contradiction: exps[CONTRADICTION_IDX] / sum,
            entailment: exps[ENTAILMENT_IDX] / sum,
            neutral: exps[NEUTRAL_IDX] / sum,
        }
    }

    /// The class with the highest probability.
    pub fn argmax_label(&self) -> &'static str {
        if self.contradiction >= self.entailment && self.contradiction >= self.neutral {
            "contradiction"
        } else if self.entailment >= self.neutral {
            "entailment"
        } else {
            "neutral"
        }
    }

    /// Resolve to a conflict classification per the adjudication thresholds
    /// in §4.4: dedup when entailment dominates above `dedup_threshold`,
    /// contradiction when it dominates above `contradiction_threshold`,
    /// otherwise ambiguous (`None`) and the pair escalates to the verifier.
    pub fn adjudicate(
        &self,
        dedup_threshold: f32,
        contradiction_threshold: f32,
    ) -> Option<ConflictLabel> {
        if self.entailment >= dedup_threshold {
            Some(ConflictLabel::Duplicate)
        } else if self.contradiction >= contradiction_threshold {
            Some(ConflictLabel::Contradiction)
        } else {
            None
        }
    }
}

/// Abstracts over the NLI cross-encoder provider.
#[async_trait]
pub trait NliClient: Send + Sync {
    /// Raw logits for the pair, in `[contradiction, entailment, neutral]`
    /// order, for the premise/hypothesis direction (new chunk vs existing).
    async fn predict(&self, premise: &str, hypothesis: &str) -> Result<[f32; 3]>;
}

#[derive(Debug, Serialize)]
struct NliRequest<'a> {
    premise: &'a str,
    hypothesis: &'a str,
}

#[derive(Debug, Deserialize)]
struct NliResponse {
    logits: [f32; 3],
}

/// HTTP-backed NLI client.
pub struct HttpNliClient {
    client: reqwest::Client,
    url: String,
}

impl HttpNliClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NliClient for HttpNliClient {
    async fn predict(&self, premise: &str, hypothesis: &str) -> Result<[f32; 3]> {
        let response = self
            .client
            .post(&self.url)
            .json(&NliRequest { premise, hypothesis })
            .send()
            .await
            .map_err(|e| Error::Model(ModelError::NliFailed(e.to_string())))?;
        let parsed: NliResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(ModelError::NliFailed(e.to_string())))?;
        Ok(parsed.logits)
    }
}
