//! The scoring backend seam.
//!
//! A [`ScoringBackend`] receives one rubric payload and answers with a raw
//! score, a justification and rubric-specific details. Pass/fail is never
//! decided here; [`crate::eval::verdict::Verdict`] derives it from the rubric.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::BackendError, eval::rubric::RubricKind, functions::{FunctionDefinition, ToolCall}};

pub mod llm;
pub mod prompts;

pub use llm::LlmJudge;

/// Request body for one rubric, serialized as `{"rubric": <kind>, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rubric", rename_all = "snake_case")]
pub enum RubricPayload {
    IntentResolution {
        query: String,
        response: String,
    },
    ToolCallAccuracy {
        query: String,
        tool_calls: Vec<ToolCall>,
        tool_definitions: Vec<FunctionDefinition>,
    },
    TaskAdherence {
        query: String,
        response: String,
        tool_calls: Vec<ToolCall>,
    },
}

impl RubricPayload {
    pub fn kind(&self) -> RubricKind {
        match self {
            RubricPayload::IntentResolution { .. } => RubricKind::IntentResolution,
            RubricPayload::ToolCallAccuracy { .. } => RubricKind::ToolCallAccuracy,
            RubricPayload::TaskAdherence { .. } => RubricKind::TaskAdherence,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            RubricPayload::IntentResolution { query, .. }
            | RubricPayload::ToolCallAccuracy { query, .. }
            | RubricPayload::TaskAdherence { query, .. } => query,
        }
    }
}

/// Backend answer before the rubric threshold is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendVerdict {
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

/// Per-call entry in the tool-call accuracy breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallJudgement {
    pub tool_call_id: String,
    pub accurate: bool,
    #[serde(default)]
    pub reason: String,
}

#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn evaluate(
        &self,
        kind: RubricKind,
        payload: &RubricPayload,
    ) -> Result<BackendVerdict, BackendError>;

    fn name(&self) -> &str;
}
