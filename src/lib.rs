pub mod auth;
pub mod config;
pub mod error;
pub mod eval;
pub mod functions;
pub mod judge;
pub mod plugins;
pub mod providers;
pub mod types;

pub use auth::{
    ChainedCredentialProvider, Credential, CredentialProvider, EnvCredential, StaticCredential,
};
pub use config::{EvalConfig, ThresholdOverrides};
pub use error::{
    AuthError, BackendError, ConfigError, EvalError, LLMError, RegistryError, ToolError,
    ValidationError,
};
pub use eval::{
    load_scenarios, Comparison, EvaluationHarness, HarnessState, Outcome, Report, ReportEntry,
    ReportFormatter, Rubric, RubricContext, RubricKind, RubricTally, Scenario, ScenarioBuilder,
    Summary, Verdict,
};
pub use functions::{
    DynToolHandler, FnTool, FunctionDefinition, FunctionParameter, ToolCall, ToolHandler,
    ToolRegistry,
};
pub use judge::{BackendVerdict, LlmJudge, RubricPayload, ScoringBackend, ToolCallJudgement};
pub use providers::LLMProvider;
pub use tokio_util::sync::CancellationToken;
