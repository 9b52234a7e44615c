//! Disambiguation oracle backed by a chat model.
//!
//! The model sees the new mention and the ranked candidates and answers
//! with a small JSON verdict. Model output is parsed leniently: a fenced
//! code block or the first `{...}` span is accepted, and common JSON slips
//! (single quotes, trailing commas, ids as strings) are repaired. A verdict
//! naming an id that was not offered is downgraded to "distinct".

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use canon_core::config::OracleConfig;
use canon_core::error::{CanonError, CanonResult};
use canon_core::traits::{Disambiguation, DisambiguationOracle, OracleCandidate};
use canon_core::types::{EntityCandidate, EntityId};

use crate::chat::{ChatModel, ChatRequest};

const SYSTEM_PROMPT: &str = r#"You decide whether a newly extracted entity is the same real-world thing as one of several existing entities.

Rules:
- Only call it a duplicate when name, type and description clearly refer to the same thing.
- Different people or organizations with similar names are NOT duplicates.
- Abbreviations, nicknames and spelling variants of the same thing ARE duplicates.
- Pick at most one best match, by its id.

Respond with JSON only:
{"is_duplicate": true|false, "best_match_id": <id or null>, "confidence": <0.0-1.0>, "reasoning": "<one sentence>"}"#;

mod raw {
    use serde::Deserialize;

    /// Verdict as models actually write it.
    #[derive(Debug, Deserialize, Default)]
    pub struct RawVerdict {
        #[serde(default, alias = "duplicate", alias = "isDuplicate")]
        pub is_duplicate: Option<serde_json::Value>,
        #[serde(default, alias = "match_id", alias = "bestMatchId", alias = "id")]
        pub best_match_id: Option<serde_json::Value>,
        #[serde(default)]
        pub confidence: Option<serde_json::Value>,
        #[serde(default, alias = "reason")]
        pub reasoning: Option<String>,
    }
}

/// A [`DisambiguationOracle`] that asks a chat model.
pub struct LlmOracle {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    max_tokens: u32,
    name: String,
}

impl LlmOracle {
    pub fn new(model: Arc<dyn ChatModel>, config: &OracleConfig) -> Self {
        let name = format!("llm:{}", model.provider());
        Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            name,
        }
    }

    fn prompt(target: &EntityCandidate, candidates: &[OracleCandidate]) -> String {
        let mut prompt = format!(
            "New entity:\n- name: {}\n- type: {}\n- description: {}\n",
            target.name.trim(),
            target.entity_type.trim(),
            describe(&target.description),
        );
        if let Some(source) = target.source_text.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("- source text: {}\n", source.trim()));
        }

        prompt.push_str("\nExisting candidates (most similar first):\n");
        for candidate in candidates {
            prompt.push_str(&format!(
                "- id {}: {} ({}) - {} [similarity {:.2}]\n",
                candidate.entity_id,
                candidate.name,
                candidate.entity_type,
                describe(&candidate.description),
                candidate.score,
            ));
        }
        prompt.push_str("\nIs the new entity a duplicate of one of the candidates?");
        prompt
    }

    /// Extract JSON from a response (handles markdown code blocks and prose
    /// around the object).
    fn extract_json(content: &str) -> &str {
        static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").expect("valid regex")
        });
        static JSON_OBJECT: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

        if let Some(m) = JSON_BLOCK.captures(content).and_then(|caps| caps.get(1)) {
            return m.as_str().trim();
        }
        if let Some(m) = JSON_OBJECT.find(content) {
            return m.as_str();
        }
        content.trim()
    }

    /// Lenient parsing for malformed JSON.
    fn lenient_parse(json_str: &str) -> Option<raw::RawVerdict> {
        static TRAILING_COMMA: Lazy<Regex> =
            Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

        let fixed = json_str.replace('\'', "\"");
        let fixed = TRAILING_COMMA.replace_all(&fixed, "$1");
        serde_json::from_str(&fixed).ok()
    }

    /// Turn model output into a verdict over `candidates`.
    pub fn parse_verdict(
        content: &str,
        candidates: &[OracleCandidate],
    ) -> CanonResult<Disambiguation> {
        let json_str = Self::extract_json(content);
        let raw: raw::RawVerdict = match serde_json::from_str(json_str) {
            Ok(r) => r,
            Err(e) => Self::lenient_parse(json_str).ok_or_else(|| {
                CanonError::oracle_response(format!("unparsable verdict: {}", e))
            })?,
        };

        let is_duplicate = raw
            .is_duplicate
            .as_ref()
            .and_then(as_bool)
            .ok_or_else(|| CanonError::oracle_response("verdict lacks is_duplicate"))?;
        let confidence = raw
            .confidence
            .as_ref()
            .and_then(as_f32)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let best_match_id = raw.best_match_id.as_ref().and_then(as_id);

        let verdict = if !is_duplicate {
            Disambiguation::distinct(confidence)
        } else {
            match best_match_id {
                Some(id) if candidates.iter().any(|c| c.entity_id == id) => {
                    Disambiguation::duplicate_of(id, confidence)
                }
                Some(id) => {
                    warn!(entity_id = id, "Oracle named an entity that was not offered");
                    Disambiguation::distinct(0.0)
                }
                None => {
                    warn!("Oracle called a duplicate without naming it");
                    Disambiguation::distinct(0.0)
                }
            }
        };

        Ok(match raw.reasoning.filter(|r| !r.trim().is_empty()) {
            Some(reasoning) => verdict.with_reasoning(reasoning.trim()),
            None => verdict,
        })
    }
}

fn describe(description: &str) -> &str {
    let description = description.trim();
    if description.is_empty() {
        "(none)"
    } else {
        description
    }
}

fn as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f32(value: &serde_json::Value) -> Option<f32> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f as f32),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse::<f32>().ok().map(
            |f| if s.trim().ends_with('%') { f / 100.0 } else { f },
        ),
        _ => None,
    }
}

fn as_id(value: &serde_json::Value) -> Option<EntityId> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl DisambiguationOracle for LlmOracle {
    async fn disambiguate(
        &self,
        target: &EntityCandidate,
        candidates: &[OracleCandidate],
    ) -> CanonResult<Disambiguation> {
        if candidates.is_empty() {
            return Ok(Disambiguation::distinct(1.0));
        }

        let request = ChatRequest::new(SYSTEM_PROMPT, Self::prompt(target, candidates))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .json();
        let response = self.model.complete(&request).await?;
        if let Some(usage) = response.usage {
            debug!(
                oracle = %self.name,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Oracle call finished"
            );
        }

        Self::parse_verdict(&response.content, candidates)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatResponse, MockChatModel};

    fn candidates() -> Vec<OracleCandidate> {
        vec![
            OracleCandidate {
                entity_id: 7,
                name: "Acme Corp".to_string(),
                entity_type: "organization".to_string(),
                description: "Anvil maker".to_string(),
                score: 0.93,
            },
            OracleCandidate {
                entity_id: 9,
                name: "Acme Labs".to_string(),
                entity_type: "organization".to_string(),
                description: String::new(),
                score: 0.81,
            },
        ]
    }

    #[test]
    fn test_parse_plain_json() {
        let verdict = LlmOracle::parse_verdict(
            r#"{"is_duplicate": true, "best_match_id": 7, "confidence": 0.92, "reasoning": "Same company."}"#,
            &candidates(),
        )
        .unwrap();

        assert_eq!(verdict.best_match_id, Some(7));
        assert!(verdict.is_duplicate);
        assert!((verdict.confidence - 0.92).abs() < 1e-6);
        assert_eq!(verdict.reasoning.as_deref(), Some("Same company."));
    }

    #[test]
    fn test_parse_code_block_with_slips() {
        let content = "Here you go:\n```json\n{'is_duplicate': 'yes', 'best_match_id': '9', 'confidence': '80%',}\n```";
        let verdict = LlmOracle::parse_verdict(content, &candidates()).unwrap();

        assert_eq!(verdict.best_match_id, Some(9));
        assert!((verdict.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_object_inside_prose() {
        let content = r#"After comparing: {"is_duplicate": false, "best_match_id": null, "confidence": 0.7} Done."#;
        let verdict = LlmOracle::parse_verdict(content, &candidates()).unwrap();

        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.best_match_id, None);
    }

    #[test]
    fn test_unknown_id_downgraded() {
        let verdict = LlmOracle::parse_verdict(
            r#"{"is_duplicate": true, "best_match_id": 42, "confidence": 0.99}"#,
            &candidates(),
        )
        .unwrap();

        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_garbage_is_invalid_response() {
        let err = LlmOracle::parse_verdict("I am not sure.", &candidates()).unwrap_err();
        assert_eq!(err.code(), canon_core::ErrorCode::OrcInvalidResponse);
        assert!(err.is_transient_collaborator());
    }

    #[test]
    fn test_prompt_lists_candidates() {
        let target = EntityCandidate::new("ACME", "organization", "")
            .with_source_text("ACME shipped anvils.");
        let prompt = LlmOracle::prompt(&target, &candidates());

        assert!(prompt.contains("- name: ACME"));
        assert!(prompt.contains("- description: (none)"));
        assert!(prompt.contains("- source text: ACME shipped anvils."));
        assert!(prompt.contains("- id 7: Acme Corp (organization) - Anvil maker [similarity 0.93]"));
        assert!(prompt.contains("- id 9: Acme Labs (organization) - (none)"));
    }

    #[tokio::test]
    async fn test_disambiguate_through_model() {
        let mut model = MockChatModel::new();
        model.expect_provider().return_const("openai");
        model
            .expect_complete()
            .withf(|request| request.json && request.prompt.contains("id 7"))
            .times(1)
            .returning(|_| {
                Ok(ChatResponse::text(
                    r#"{"is_duplicate": true, "best_match_id": 7, "confidence": 0.9}"#,
                ))
            });

        let oracle = LlmOracle::new(Arc::new(model), &OracleConfig::default());
        let verdict = oracle
            .disambiguate(
                &EntityCandidate::new("Acme", "organization", "Anvil maker"),
                &candidates(),
            )
            .await
            .unwrap();

        assert_eq!(oracle.name(), "llm:openai");
        assert_eq!(verdict.best_match_id, Some(7));
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let mut model = MockChatModel::new();
        model.expect_provider().return_const("anthropic");
        model
            .expect_complete()
            .returning(|_| Err(CanonError::oracle("Anthropic API error (529): Overloaded")));

        let oracle = LlmOracle::new(Arc::new(model), &OracleConfig::default());
        let err = oracle
            .disambiguate(&EntityCandidate::new("Acme", "organization", ""), &candidates())
            .await
            .unwrap_err();
        assert!(err.is_transient_collaborator());
    }
}
