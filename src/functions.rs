use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{RegistryError, ToolError};

const SUGGESTION_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: FunctionParameters,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: FunctionParameters::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, parameter: FunctionParameter) -> Self {
        self.add_parameter(parameter);
        self
    }

    pub fn add_parameter(&mut self, parameter: FunctionParameter) {
        let FunctionParameter {
            name,
            mut schema,
            description,
            required,
        } = parameter;

        if let Some(description) = description {
            if let Some(object) = schema.as_object_mut() {
                object.insert("description".to_string(), Value::String(description));
            }
        }

        if required {
            self.parameters.required.push(name.clone());
        }

        self.parameters.properties.insert(name, schema);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
}

impl FunctionParameters {
    pub fn new() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: Some(false),
        }
    }
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub schema: Value,
    pub description: Option<String>,
    pub required: bool,
}

impl FunctionParameter {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            description: None,
            required: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One tool invocation made by the agent under evaluation.
///
/// `name` is not checked against any registry: calls to missing tools are
/// legitimate negative fixtures.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

// Serialized in the chat-completions wire shape so judges see the same
// structure an agent runtime would log.
impl Serialize for ToolCall {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ToolCall", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", "function")?;
        state.serialize_field("function", &SerializableFunctionCall(self))?;
        state.end()
    }
}

struct SerializableFunctionCall<'a>(&'a ToolCall);

impl<'a> Serialize for SerializableFunctionCall<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("function", 2)?;
        state.serialize_field("name", &self.0.name)?;
        let raw = serde_json::to_string(&self.0.arguments)
            .map_err(|error| serde::ser::Error::custom(error.to_string()))?;
        state.serialize_field("arguments", &raw)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFunctionCall {
            name: String,
            #[serde(default)]
            arguments: Value,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawToolCall {
            Wire {
                #[serde(default)]
                id: String,
                function: RawFunctionCall,
            },
            Flat {
                #[serde(default)]
                id: String,
                name: String,
                #[serde(default)]
                arguments: Value,
            },
        }

        let (id, name, arguments) = match RawToolCall::deserialize(deserializer)? {
            RawToolCall::Wire { id, function } => (id, function.name, function.arguments),
            RawToolCall::Flat { id, name, arguments } => (id, name, arguments),
        };

        // Wire-shaped arguments arrive as a JSON string.
        let arguments = match arguments {
            Value::String(raw) => serde_json::from_str(&raw).map_err(|error| {
                serde::de::Error::custom(format!("failed to parse tool call arguments: {error}"))
            })?,
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        Ok(Self { id, name, arguments })
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: &Value) -> Result<Value, String>;
}

pub type DynToolHandler = Arc<dyn ToolHandler>;

/// Adapts a plain closure into a [`ToolHandler`].
pub struct FnTool<F> {
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }

    pub fn shared(func: F) -> DynToolHandler {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
{
    async fn invoke(&self, arguments: &Value) -> Result<Value, String> {
        (self.func)(arguments)
    }
}

struct RegisteredTool {
    definition: FunctionDefinition,
    handler: DynToolHandler,
    validator: Option<JSONSchema>,
}

/// Name-keyed tool table populated during single-threaded setup and shared
/// read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: FunctionDefinition,
        handler: DynToolHandler,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }

        let validator = compile_parameters(&definition);
        if validator.is_none() {
            tracing::warn!(tool = %definition.name, "parameter schema did not compile; arguments will not be validated");
        }

        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
                validator,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&DynToolHandler, RegistryError> {
        self.tools
            .get(name)
            .map(|tool| &tool.handler)
            .ok_or_else(|| RegistryError::UnknownTool {
                name: name.to_string(),
                suggestion: self.closest_name(name),
            })
    }

    pub fn definition(&self, name: &str) -> Option<&FunctionDefinition> {
        self.tools.get(name).map(|tool| &tool.definition)
    }

    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.tools.values().map(|tool| tool.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Checks `arguments` against the tool's parameter schema.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| RegistryError::UnknownTool {
            name: name.to_string(),
            suggestion: self.closest_name(name),
        })?;

        let Some(validator) = &tool.validator else {
            return Ok(());
        };

        validator.validate(arguments).map_err(|errors| ToolError::InvalidArguments {
            tool: name.to_string(),
            errors: errors.map(|error| error.to_string()).collect(),
        })
    }

    pub async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        self.validate_arguments(&call.name, &call.arguments)?;
        let handler = self.resolve(&call.name)?;
        handler
            .invoke(&call.arguments)
            .await
            .map_err(|message| ToolError::Execution {
                tool: call.name.clone(),
                message,
            })
    }

    fn closest_name(&self, name: &str) -> Option<String> {
        self.tools
            .keys()
            .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
            .filter(|(_, score)| *score >= SUGGESTION_SIMILARITY)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate.clone())
    }
}

fn compile_parameters(definition: &FunctionDefinition) -> Option<JSONSchema> {
    let schema = serde_json::to_value(&definition.parameters).ok()?;
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .ok()
}

pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema.schema).unwrap_or(Value::Null)
}
