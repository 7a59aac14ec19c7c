//! Data model shared by the relational store, the pipeline stages, and the
//! external boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Dense vector dimension used by the reference embedding configuration.
pub const VECTOR_DIM: usize = 384;

/// Status of a [`Document`] as it moves through the publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    PendingReview,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::PendingReview => "pending_review",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocumentStatus::Draft),
            "pending_review" => Some(DocumentStatus::PendingReview),
            "published" => Some(DocumentStatus::Published),
            "archived" => Some(DocumentStatus::Archived),
            _ => None,
        }
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Draft, PendingReview) | (Draft, Published) | (PendingReview, Published) => true,
            (_, Archived) => true,
            _ => false,
        }
    }
}

/// A document submitted for ingestion, identified by an external reference
/// (filename or URL) stable across re-uploads.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub external_ref: String,
    /// 64-bit non-cryptographic fingerprint of the raw upload bytes.
    pub file_hash: u64,
    pub storage_key: String,
    pub extension: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub effective_at: Option<DateTime<Utc>>,
}

/// A bounded-token slice of a document's normalized text.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub idx: i64,
    pub text: String,
    pub hash: u64,
    pub page: Option<i64>,
    pub section_path: Option<String>,
}

/// The label assigned to a pair of conflicting chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictLabel {
    Duplicate,
    Contradiction,
}

impl ConflictLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictLabel::Duplicate => "duplicate",
            ConflictLabel::Contradiction => "contradiction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "duplicate" => Some(ConflictLabel::Duplicate),
            "contradiction" => Some(ConflictLabel::Contradiction),
            _ => None,
        }
    }
}

/// Which tier of the Conflict Engine produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JudgedBy {
    Nli,
    Llm,
}

impl JudgedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgedBy::Nli => "nli",
            JudgedBy::Llm => "llm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "nli" => Some(JudgedBy::Nli),
            "llm" => Some(JudgedBy::Llm),
            _ => None,
        }
    }
}

/// How a human operator resolved an open conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Supersede,
    Ignore,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::Supersede => "supersede",
            ResolutionAction::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supersede" => Some(ResolutionAction::Supersede),
            "ignore" => Some(ResolutionAction::Ignore),
            _ => None,
        }
    }
}

/// A detected duplicate or contradiction between a new chunk and an existing
/// one already present in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Conflict {
    pub id: Uuid,
    pub new_chunk_id: Uuid,
    pub existing_chunk_id: Uuid,
    pub label: ConflictLabel,
    pub score: f32,
    pub neighbor_sim: Option<f32>,
    pub judged_by: JudgedBy,
    pub resolution_action: Option<ResolutionAction>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver_note: Option<String>,
}

impl Conflict {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// A chat session, persisted to round out the relational schema; no
/// completion logic is implemented against it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatSession {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The role of a [`ChatMessage`] author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

/// A single message within a [`ChatSession`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_status_transitions() {
        assert!(DocumentStatus::Draft.can_transition_to(DocumentStatus::PendingReview));
        assert!(DocumentStatus::Draft.can_transition_to(DocumentStatus::Published));
        assert!(DocumentStatus::PendingReview.can_transition_to(DocumentStatus::Published));
        assert!(DocumentStatus::Published.can_transition_to(DocumentStatus::Archived));
        assert!(!DocumentStatus::Published.can_transition_to(DocumentStatus::Draft));
        assert!(!DocumentStatus::PendingReview.can_transition_to(DocumentStatus::Draft));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            DocumentStatus::Draft,
            DocumentStatus::PendingReview,
            DocumentStatus::Published,
            DocumentStatus::Archived,
        ] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_conflict_open() {
        let c = Conflict {
            id: Uuid::new_v4(),
            new_chunk_id: Uuid::new_v4(),
            existing_chunk_id: Uuid::new_v4(),
            label: ConflictLabel::Duplicate,
            score: 0.97,
            neighbor_sim: None,
            judged_by: JudgedBy::Nli,
            resolution_action: None,
            resolved_at: None,
            resolver_note: None,
        };
        assert!(c.is_open());
    }
}
