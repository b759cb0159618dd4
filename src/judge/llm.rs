use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::BackendError,
    eval::rubric::RubricKind,
    judge::{prompts, BackendVerdict, RubricPayload, ScoringBackend, ToolCallJudgement},
    providers::LLMProvider,
    types::CompletionRequest,
};

static RE_FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").unwrap());

/// Scores rubrics by asking a chat model to grade the payload.
pub struct LlmJudge {
    provider: Arc<dyn LLMProvider>,
    deployment: String,
    max_tokens: u32,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LLMProvider>, deployment: impl Into<String>) -> Self {
        Self {
            provider,
            deployment: deployment.into(),
            max_tokens: 800,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ScoringBackend for LlmJudge {
    async fn evaluate(
        &self,
        kind: RubricKind,
        payload: &RubricPayload,
    ) -> Result<BackendVerdict, BackendError> {
        if payload.kind() != kind {
            return Err(BackendError::MalformedResponse(format!(
                "payload for {} sent as {kind}",
                payload.kind()
            )));
        }

        let messages = prompts::render(payload)
            .map_err(|error| BackendError::MalformedResponse(format!("judge prompt: {error}")))?;
        let request = CompletionRequest::new(self.deployment.clone(), messages)
            .with_temperature(0.0)
            .with_max_tokens(self.max_tokens)
            .with_response_format(json!({ "type": "json_object" }));

        tracing::debug!(provider = self.provider.name(), rubric = %kind, "requesting judgement");
        let response = self.provider.complete(request).await?;
        let content = response
            .message
            .text()
            .ok_or_else(|| BackendError::MalformedResponse("judge reply had no content".to_string()))?;

        let expected_ids: Vec<&str> = match payload {
            RubricPayload::ToolCallAccuracy { tool_calls, .. } => {
                tool_calls.iter().map(|call| call.id.as_str()).collect()
            }
            _ => Vec::new(),
        };
        parse_judgement(kind, content, &expected_ids)
    }

    fn name(&self) -> &str {
        "llm-judge"
    }
}

fn extract_json(content: &str) -> Result<Value, BackendError> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let fenced = RE_FENCED_JSON
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| BackendError::MalformedResponse(format!("judge reply is not JSON: {trimmed}")))?;

    serde_json::from_str(fenced)
        .map_err(|error| BackendError::MalformedResponse(format!("judge reply is not JSON: {error}")))
}

/// One judgement per expected call, in scenario order. The first judgement
/// for an id wins; unknown ids are dropped and unjudged calls count as
/// inaccurate.
fn align_judgements(judged: Vec<ToolCallJudgement>, expected_ids: &[&str]) -> Vec<ToolCallJudgement> {
    let mut by_id: BTreeMap<String, ToolCallJudgement> = BTreeMap::new();
    for judgement in judged {
        if !expected_ids.contains(&judgement.tool_call_id.as_str()) {
            tracing::warn!(tool_call_id = %judgement.tool_call_id, "judge rated an unknown tool call");
            continue;
        }
        if by_id.contains_key(&judgement.tool_call_id) {
            tracing::debug!(tool_call_id = %judgement.tool_call_id, "ignoring repeated judgement");
            continue;
        }
        by_id.insert(judgement.tool_call_id.clone(), judgement);
    }

    expected_ids
        .iter()
        .map(|id| {
            by_id.remove(*id).unwrap_or_else(|| ToolCallJudgement {
                tool_call_id: id.to_string(),
                accurate: false,
                reason: "not judged".to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ScaledReply {
    score: Value,
    #[serde(default)]
    reason: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ToolCallReply {
    #[serde(default)]
    tool_calls: Vec<ToolCallJudgement>,
    #[serde(default)]
    reason: String,
}

// Models occasionally quote numbers ("4") even in JSON mode.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// `expected_ids` are the scenario's tool call ids, in order. Tool-call
/// accuracy is measured against them, not against whatever the judge listed.
fn parse_judgement(
    kind: RubricKind,
    content: &str,
    expected_ids: &[&str],
) -> Result<BackendVerdict, BackendError> {
    let value = extract_json(content)?;
    let malformed = |error: serde_json::Error| {
        BackendError::MalformedResponse(format!("{kind} reply has the wrong shape: {error}"))
    };

    match kind {
        RubricKind::ToolCallAccuracy => {
            let reply: ToolCallReply = serde_json::from_value(value).map_err(malformed)?;
            let breakdown = align_judgements(reply.tool_calls, expected_ids);
            let accurate = breakdown.iter().filter(|call| call.accurate).count();
            let score = if expected_ids.is_empty() {
                0.0
            } else {
                accurate as f64 / expected_ids.len() as f64
            };

            let breakdown = serde_json::to_value(&breakdown).map_err(malformed)?;
            Ok(BackendVerdict {
                score,
                reason: reply.reason,
                details: BTreeMap::from([("tool_calls".to_string(), breakdown)]),
            })
        }
        RubricKind::IntentResolution | RubricKind::TaskAdherence => {
            let reply: ScaledReply = serde_json::from_value(value).map_err(malformed)?;
            let score = numeric(&reply.score).ok_or_else(|| {
                BackendError::MalformedResponse(format!("{kind} score is not a number: {}", reply.score))
            })?;

            if kind == RubricKind::IntentResolution {
                for key in ["actual_intent", "perceived_intent", "intent_resolved"] {
                    if !reply.extra.contains_key(key) {
                        tracing::debug!(rubric = %kind, key, "judge omitted detail");
                    }
                }
            }

            Ok(BackendVerdict {
                score,
                reason: reply.reason,
                details: reply.extra,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::functions::ToolCall;
    use crate::providers::scripted::{ScriptedProvider, ScriptedReply};

    fn intent_payload() -> RubricPayload {
        RubricPayload::IntentResolution {
            query: "What's the weather in Seattle?".to_string(),
            response: "Sunny, 25°C.".to_string(),
        }
    }

    #[test]
    fn tool_call_score_is_accurate_fraction() {
        let reply = r#"{"tool_calls": [
            {"tool_call_id": "call_0", "accurate": true, "reason": "right tool"},
            {"tool_call_id": "call_1", "accurate": false, "reason": "wrong city"},
            {"tool_call_id": "call_2", "accurate": true, "reason": "ok"},
            {"tool_call_id": "call_3", "accurate": false, "reason": "unneeded"}
        ], "reason": "half right"}"#;

        let ids = ["call_0", "call_1", "call_2", "call_3"];
        let verdict = parse_judgement(RubricKind::ToolCallAccuracy, reply, &ids).unwrap();
        assert_eq!(verdict.score, 0.5);
        assert_eq!(verdict.details["tool_calls"][1]["tool_call_id"], "call_1");
        assert_eq!(verdict.details["tool_calls"][1]["accurate"], false);
    }

    #[test]
    fn empty_breakdown_scores_zero() {
        let verdict = parse_judgement(RubricKind::ToolCallAccuracy, r#"{"tool_calls": []}"#, &[]).unwrap();
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn unjudged_calls_count_as_inaccurate() {
        let reply = r#"{"tool_calls": [{"tool_call_id": "call_0", "accurate": true}]}"#;
        let verdict = parse_judgement(RubricKind::ToolCallAccuracy, reply, &["call_0", "call_1"]).unwrap();
        assert_eq!(verdict.score, 0.5);
        assert_eq!(verdict.details["tool_calls"][1]["tool_call_id"], "call_1");
        assert_eq!(verdict.details["tool_calls"][1]["accurate"], false);
    }

    #[test]
    fn repeated_and_unknown_ids_do_not_inflate_score() {
        let reply = r#"{"tool_calls": [
            {"tool_call_id": "call_0", "accurate": true},
            {"tool_call_id": "call_0", "accurate": true},
            {"tool_call_id": "bogus", "accurate": true}
        ]}"#;
        let verdict = parse_judgement(RubricKind::ToolCallAccuracy, reply, &["call_0", "call_1"]).unwrap();
        assert_eq!(verdict.score, 0.5);
        assert_eq!(verdict.details["tool_calls"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn judge_scores_against_payload_calls() {
        let provider = ScriptedProvider::new().when(
            ["Rubric: tool_call_accuracy"],
            ScriptedReply::text(r#"{"tool_calls": [{"tool_call_id": "call_0", "accurate": true}]}"#),
        );
        let judge = LlmJudge::new(Arc::new(provider), "gpt-4o");
        let payload = RubricPayload::ToolCallAccuracy {
            query: "Weather in Seattle and London?".to_string(),
            tool_calls: vec![
                ToolCall::new("call_0", "fetch_weather", json!({ "location": "Seattle" })),
                ToolCall::new("call_1", "fetch_weather", json!({ "location": "London" })),
            ],
            tool_definitions: Vec::new(),
        };

        let verdict = judge.evaluate(RubricKind::ToolCallAccuracy, &payload).await.unwrap();
        assert_eq!(verdict.score, 0.5);
    }

    #[test]
    fn fenced_json_and_quoted_scores_are_accepted() {
        let reply = "Here you go:\n```json\n{\"score\": \"4\", \"reason\": \"mostly\", \"intent_resolved\": true}\n```";
        let verdict = parse_judgement(RubricKind::IntentResolution, reply, &[]).unwrap();
        assert_eq!(verdict.score, 4.0);
        assert_eq!(verdict.details.get("intent_resolved"), Some(&json!(true)));
        assert!(!verdict.details.contains_key("score"));
    }

    #[test]
    fn prose_or_missing_scores_are_malformed() {
        assert!(matches!(
            parse_judgement(RubricKind::TaskAdherence, "I think it is fine.", &[]),
            Err(BackendError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_judgement(RubricKind::TaskAdherence, r#"{"reason": "no score"}"#, &[]),
            Err(BackendError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_judgement(RubricKind::TaskAdherence, r#"{"score": "high"}"#, &[]),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn provider_outage_maps_to_unavailable() {
        let provider = ScriptedProvider::new().when(["Rubric: intent_resolution"], ScriptedReply::outage("connection refused"));
        let judge = LlmJudge::new(Arc::new(provider), "gpt-4o");

        let error = judge
            .evaluate(RubricKind::IntentResolution, &intent_payload())
            .await
            .unwrap_err();
        assert!(matches!(error, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn judge_round_trip_through_provider() {
        let provider = ScriptedProvider::new().when(
            ["Rubric: intent_resolution", "Seattle"],
            ScriptedReply::text(r#"{"score": 5, "reason": "resolved", "actual_intent": "weather", "perceived_intent": "weather", "intent_resolved": true}"#),
        );
        let judge = LlmJudge::new(Arc::new(provider), "gpt-4o");

        let verdict = judge
            .evaluate(RubricKind::IntentResolution, &intent_payload())
            .await
            .unwrap();
        assert_eq!(verdict.score, 5.0);
        assert_eq!(verdict.details["perceived_intent"], "weather");
    }

    #[tokio::test]
    async fn mismatched_kind_is_rejected() {
        let judge = LlmJudge::new(Arc::new(ScriptedProvider::new()), "gpt-4o");
        let error = judge
            .evaluate(RubricKind::TaskAdherence, &intent_payload())
            .await
            .unwrap_err();
        assert!(matches!(error, BackendError::MalformedResponse(_)));
    }
}
