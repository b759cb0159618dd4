use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    auth::Credential,
    config::{EvalConfig, DEFAULT_API_VERSION},
    error::LLMError,
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
};

#[derive(Debug, Clone)]
pub struct AzureOpenAIConfig {
    pub credential: Credential,
    pub endpoint: String,
    pub api_version: String,
    pub project_connection: Option<String>,
    pub request_timeout: Duration,
}

impl AzureOpenAIConfig {
    pub fn new(credential: Credential, endpoint: impl Into<String>) -> Self {
        Self {
            credential,
            endpoint: endpoint.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            project_connection: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Takes endpoint, version, project and timeout from the harness settings;
    /// the credential comes from a [`crate::auth::CredentialProvider`].
    pub fn from_eval_config(config: &EvalConfig, credential: Credential) -> Self {
        Self {
            credential,
            endpoint: config.endpoint.clone(),
            api_version: config.api_version.clone(),
            project_connection: Some(config.project_connection.clone()),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AzureOpenAI {
    client: Client,
    config: AzureOpenAIConfig,
}

impl AzureOpenAI {
    pub fn from_config(config: AzureOpenAIConfig) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            deployment,
            self.config.api_version
        )
    }
}

#[derive(Debug, Serialize)]
struct AzureChatRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureChatResponse {
    choices: Vec<AzureResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct AzureErrorEnvelope {
    error: AzureError,
}

#[derive(Debug, Deserialize)]
struct AzureError {
    message: String,
}

#[async_trait]
impl LLMProvider for AzureOpenAI {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
            response_format,
        } = request;

        let body = AzureChatRequestBody {
            model: model.clone(),
            messages,
            max_tokens,
            temperature,
            response_format,
            user: self.config.project_connection.clone(),
        };

        let builder = self
            .config
            .credential
            .apply(self.client.post(self.endpoint(&model)))
            .json(&body);

        tracing::debug!(deployment = %model, "azure chat completion");
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<AzureErrorEnvelope>(&text) {
                return Err(LLMError::Provider(error.error.message));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: AzureChatResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

        Ok(CompletionResponse {
            message: choice.message,
            usage: parsed.usage,
        })
    }

    fn name(&self) -> &'static str {
        "azure-openai"
    }
}
