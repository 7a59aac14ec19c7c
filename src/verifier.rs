//! Generative Verifier Client: the second tier of the Conflict Engine,
//! consulted only for pairs the NLI tier leaves ambiguous.
//!
//! Grounded in the reference `LLMProvider.predict_conflict`: a chat-style
//! prompt asking the model to label a pair as CONTRADICTION, ENTAILMENT, or
//! NEUTRAL with a short justification, followed by best-effort JSON repair
//! of the response since generative output is not always strictly valid
//! JSON.

use crate::error::{Error, ModelError, Result};
use crate::model::ConflictLabel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are adjudicating whether two passages from a knowledge base \
restate the same fact (ENTAILMENT), assert incompatible facts (CONTRADICTION), or are unrelated \
enough that neither applies (NEUTRAL). Respond with a JSON object: {\"label\": \"CONTRADICTION\" \
| \"ENTAILMENT\" | \"NEUTRAL\", \"reasoning\": \"<one sentence>\"}.";

/// The verifier's verdict on an ambiguous pair.
#[derive(Debug, Clone)]
pub struct VerifierVerdict {
    pub label: Option<ConflictLabel>,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    label: String,
    #[serde(default)]
    reasoning: String,
}

fn parse_label(raw: &str) -> Option<ConflictLabel> {
    match raw.to_uppercase().as_str() {
        "ENTAILMENT" => Some(ConflictLabel::Duplicate),
        "CONTRADICTION" => Some(ConflictLabel::Contradiction),
        "NEUTRAL" => None,
        _ => None,
    }
}

/// Parse a verifier response body, tolerating the mild JSON malformation
/// generative models produce (trailing commas, unquoted keys) via a relaxed
/// JSON5 parse before falling back to strict JSON.
fn parse_verdict(body: &str) -> Result<VerifierVerdict> {
    let trimmed = body.trim();
    let candidate = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_end_matches("```")
        .trim();

    let raw: RawVerdict = serde_json::from_str(candidate)
        .or_else(|_| json5::from_str(candidate))
        .map_err(|e| Error::Model(ModelError::MalformedJson(e.to_string())))?;

    Ok(VerifierVerdict {
        label: parse_label(&raw.label),
        reasoning: raw.reasoning,
    })
}

/// Abstracts over the generative verifier provider. Implementations may be
/// backed by different chat completion APIs; the trait boundary keeps the
/// Conflict Engine agnostic to which one is configured.
#[async_trait]
pub trait GenerativeVerifier: Send + Sync {
    async fn verify(&self, premise: &str, hypothesis: &str) -> Result<VerifierVerdict>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: String,
}

/// Concrete verifier backends, selected by configuration. A sum type
/// instead of dynamic dispatch since the set of supported providers is
/// small and fixed at deploy time.
pub enum VerifierBackend {
    Http(HttpVerifierConfig),
}

pub struct HttpVerifierConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Generative verifier client backed by an HTTP chat-completion endpoint,
/// gated by a semaphore shared across the whole document's ambiguous pairs
/// (owned by the Conflict Engine, not this client) so fan-out stays bounded.
pub struct HttpVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpVerifier {
    pub fn new(backend: VerifierBackend) -> Result<Self> {
        match backend {
            VerifierBackend::Http(cfg) => {
                let client = reqwest::Client::builder()
                    .timeout(cfg.timeout)
                    .build()
                    .map_err(Error::Http)?;
                Ok(Self { client, url: cfg.url })
            }
        }
    }
}

#[async_trait]
impl GenerativeVerifier for HttpVerifier {
    async fn verify(&self, premise: &str, hypothesis: &str) -> Result<VerifierVerdict> {
        let user_content = format!(
            "Passage A (existing): {premise}\n\nPassage B (new): {hypothesis}"
        );
        let request = ChatRequest {
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: user_content },
            ],
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Model(ModelError::VerifierFailed(e.to_string())))?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(ModelError::VerifierFailed(e.to_string())))?;
        parse_verdict(&parsed.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strict_json_verdict() {
        let body = r#"{"label": "CONTRADICTION", "reasoning": "prices disagree"}"#;
        let verdict = parse_verdict(body).unwrap();
        assert_eq!(verdict.label, Some(ConflictLabel::Contradiction));
        assert_eq!(verdict.reasoning, "prices disagree");
    }

    #[test]
    fn test_parse_repairs_trailing_comma_and_unquoted_key() {
        let body = "{label: \"ENTAILMENT\", reasoning: \"same fact restated\",}";
        let verdict = parse_verdict(body).unwrap();
        assert_eq!(verdict.label, Some(ConflictLabel::Duplicate));
    }

    #[test]
    fn test_parse_strips_markdown_fence() {
        let body = "```json\n{\"label\": \"NEUTRAL\", \"reasoning\": \"unrelated topics\"}\n```";
        let verdict = parse_verdict(body).unwrap();
        assert_eq!(verdict.label, None);
    }

    #[test]
    fn test_parse_malformed_json_is_an_error() {
        let body = "not json at all";
        assert!(parse_verdict(body).is_err());
    }

    #[tokio::test]
    async fn test_http_verifier_posts_chat_messages_and_parses_verdict() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "{\"label\": \"CONTRADICTION\", \"reasoning\": \"prices disagree\"}"
            })))
            .mount(&server)
            .await;

        let verifier = HttpVerifier::new(VerifierBackend::Http(HttpVerifierConfig {
            url: format!("{}/verify", server.uri()),
            timeout: Duration::from_secs(5),
        }))
        .unwrap();
        let verdict = verifier.verify("existing passage", "new passage").await.unwrap();
        assert_eq!(verdict.label, Some(ConflictLabel::Contradiction));
        assert_eq!(verdict.reasoning, "prices disagree");
    }
}
