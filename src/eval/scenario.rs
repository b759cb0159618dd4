use std::{collections::HashSet, fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{EvalError, ValidationError},
    functions::ToolCall,
};

/// One agent turn to be scored: what the user asked, what the agent replied,
/// and the tool calls it made along the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    label: String,
    query: String,
    response: String,
    tool_calls: Vec<ToolCall>,
}

impl Scenario {
    pub fn builder(query: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder::new(query)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioBuilder {
    label: Option<String>,
    query: String,
    response: String,
    tool_calls: Vec<PendingCall>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: Value,
}

impl ScenarioBuilder {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    /// Appends a call; an id of `call_<position>` is assigned at build time.
    pub fn call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.tool_calls.push(PendingCall {
            id: None,
            name: name.into(),
            arguments,
        });
        self
    }

    pub fn tool_call(mut self, call: ToolCall) -> Self {
        let id = (!call.id.is_empty()).then_some(call.id);
        self.tool_calls.push(PendingCall {
            id,
            name: call.name,
            arguments: call.arguments,
        });
        self
    }

    pub fn tool_calls<I>(mut self, calls: I) -> Self
    where
        I: IntoIterator<Item = ToolCall>,
    {
        for call in calls {
            self = self.tool_call(call);
        }
        self
    }

    /// Fails only on an empty query or a repeated tool call id. Tool names are
    /// deliberately not checked against any registry.
    pub fn build(self) -> Result<Scenario, ValidationError> {
        if self.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }

        let mut seen = HashSet::new();
        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for (index, pending) in self.tool_calls.into_iter().enumerate() {
            let id = pending.id.unwrap_or_else(|| format!("call_{index}"));
            if !seen.insert(id.clone()) {
                return Err(ValidationError::DuplicateToolCallId(id));
            }
            tool_calls.push(ToolCall::new(id, pending.name, pending.arguments));
        }

        let label = self
            .label
            .unwrap_or_else(|| summarize_query(&self.query));

        Ok(Scenario {
            label,
            query: self.query,
            response: self.response,
            tool_calls,
        })
    }
}

fn summarize_query(query: &str) -> String {
    const MAX: usize = 40;
    let trimmed = query.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(MAX).collect();
    short.push('…');
    short
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    label: Option<String>,
    query: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

impl ScenarioFile {
    fn into_scenario(self) -> Result<Scenario, ValidationError> {
        let mut builder = Scenario::builder(self.query)
            .response(self.response)
            .tool_calls(self.tool_calls);
        if let Some(label) = self.label {
            builder = builder.label(label);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScenarioDocument {
    Many(Vec<ScenarioFile>),
    One(ScenarioFile),
}

/// Loads scenarios from a `.yaml`/`.yml`/`.json` file, or from every such
/// file in a directory. Each file may hold one scenario or a list.
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<Scenario>, EvalError> {
    let path = path.as_ref();
    if !path.is_dir() {
        return load_file(path);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let p = entry.path();
        let ext = p.extension().and_then(|s| s.to_str()).unwrap_or("");
        if matches!(ext, "yaml" | "yml" | "json") {
            files.push(p);
        }
    }
    files.sort();

    let mut scenarios = Vec::new();
    for file in files {
        scenarios.extend(load_file(&file)?);
    }
    Ok(scenarios)
}

fn load_file(path: &Path) -> Result<Vec<Scenario>, EvalError> {
    let raw = fs::read_to_string(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let parse_error = |message: String| EvalError::Parse {
        path: path.display().to_string(),
        message,
    };

    let document: ScenarioDocument = if ext == "json" {
        serde_json::from_str(&raw).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_yaml::from_str(&raw).map_err(|e| parse_error(e.to_string()))?
    };

    let files = match document {
        ScenarioDocument::Many(files) => files,
        ScenarioDocument::One(file) => vec![file],
    };

    files
        .into_iter()
        .map(|file| file.into_scenario().map_err(EvalError::from))
        .collect()
}
