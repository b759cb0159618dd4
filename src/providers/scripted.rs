use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

/// Replays canned completions for offline runs and tests.
///
/// Requests are matched by content rather than arrival order because the
/// harness issues judge calls concurrently.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    rules: Vec<ScriptedRule>,
}

#[derive(Debug, Clone)]
struct ScriptedRule {
    needles: Vec<String>,
    reply: ScriptedReply,
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text {
        content: String,
        latency: Option<Duration>,
    },
    Outage {
        message: String,
    },
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            latency: None,
        }
    }

    pub fn delayed(content: impl Into<String>, latency: Duration) -> Self {
        Self::Text {
            content: content.into(),
            latency: Some(latency),
        }
    }

    pub fn outage(message: impl Into<String>) -> Self {
        Self::Outage {
            message: message.into(),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reply served when every needle occurs in the request messages.
    /// Rules are checked in insertion order.
    pub fn when<I, S>(mut self, needles: I, reply: ScriptedReply) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(ScriptedRule {
            needles: needles.into_iter().map(Into::into).collect(),
            reply,
        });
        self
    }

    fn find_reply(&self, request: &CompletionRequest) -> Option<&ScriptedReply> {
        let haystack = request
            .messages
            .iter()
            .filter_map(ChatMessage::text)
            .collect::<Vec<_>>()
            .join("\n");

        self.rules
            .iter()
            .find(|rule| rule.needles.iter().all(|needle| haystack.contains(needle.as_str())))
            .map(|rule| &rule.reply)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let reply = self
            .find_reply(&request)
            .ok_or_else(|| LLMError::Provider("no scripted reply matched the request".to_string()))?;

        match reply {
            ScriptedReply::Text { content, latency } => {
                if let Some(delay) = latency {
                    sleep(*delay).await;
                }
                Ok(CompletionResponse {
                    message: ChatMessage::assistant(content.clone()),
                    usage: None,
                })
            }
            ScriptedReply::Outage { message } => Err(LLMError::Provider(message.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let provider = ScriptedProvider::new()
            .when(["alpha", "beta"], ScriptedReply::text("both"))
            .when(["alpha"], ScriptedReply::text("alpha only"));

        let request = CompletionRequest::new("m", vec![ChatMessage::user("alpha")]);
        let response = provider.complete(request).await.unwrap();
        assert_eq!(response.message.text(), Some("alpha only"));

        let request = CompletionRequest::new(
            "m",
            vec![ChatMessage::system("alpha"), ChatMessage::user("beta")],
        );
        let response = provider.complete(request).await.unwrap();
        assert_eq!(response.message.text(), Some("both"));
    }

    #[tokio::test]
    async fn outage_and_unmatched_requests_error() {
        let provider = ScriptedProvider::new().when(["down"], ScriptedReply::outage("503"));

        let down = CompletionRequest::new("m", vec![ChatMessage::user("down")]);
        assert!(matches!(provider.complete(down).await, Err(LLMError::Provider(m)) if m == "503"));

        let other = CompletionRequest::new("m", vec![ChatMessage::user("up")]);
        assert!(provider.complete(other).await.is_err());
    }
}
