use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {setting}: {message}")]
    Invalid {
        setting: &'static str,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error("no credential provider succeeded: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {name}{}", suggestion_hint(.suggestion))]
    UnknownTool {
        name: String,
        suggestion: Option<String>,
    },
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|name| format!(" (did you mean '{name}'?)"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid arguments for {tool}: {}", .errors.join("; "))]
    InvalidArguments { tool: String, errors: Vec<String> },

    #[error("tool execution failed ({tool}): {message}")]
    Execution { tool: String, message: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("scenario query must not be empty")]
    EmptyQuery,

    #[error("duplicate tool call id in scenario: {0}")]
    DuplicateToolCallId(String),

    #[error("rubric name must not be empty")]
    EmptyRubricName,

    #[error("invalid threshold {threshold} for {rubric}: {message}")]
    InvalidThreshold {
        rubric: String,
        threshold: f64,
        message: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BackendError {
    #[error("scoring backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed scoring response: {0}")]
    MalformedResponse(String),
}

impl From<LLMError> for BackendError {
    fn from(error: LLMError) -> Self {
        match error {
            LLMError::Http(_) | LLMError::Provider(_) => BackendError::Unavailable(error.to_string()),
            LLMError::Serialization(_) | LLMError::InvalidResponse(_) => {
                BackendError::MalformedResponse(error.to_string())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse {path}: {message}")]
    Parse { path: String, message: String },
}
