use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::{eval::rubric::RubricKind, judge::RubricPayload, types::ChatMessage};

const SYSTEM: &str = "You are an impartial evaluator of AI agent conversations.
Rubric: {{rubric}}
Grade only what is in front of you. Do not reward verbosity.
Respond with a single JSON object and nothing else.";

const INTENT_RESOLUTION: &str = "Assess whether the agent's response resolves the user's intent.

USER QUERY:
{{query}}

AGENT RESPONSE:
{{response}}

Score from 1 (intent misunderstood or ignored) to 5 (intent fully understood and resolved).
Return JSON: {\"score\": <1-5>, \"reason\": \"...\", \"actual_intent\": \"...\", \"perceived_intent\": \"...\", \"intent_resolved\": <true|false>}";

const TOOL_CALL_ACCURACY: &str = "Assess each tool call the agent made for the user query.

USER QUERY:
{{query}}

TOOL CALLS:
{{tool_calls}}

TOOL DEFINITIONS:
{{tool_definitions}}

Judge every call on its own. A call is accurate only when it uses a defined tool that helps answer the query and its arguments fit both the definition and the query.
Return JSON: {\"tool_calls\": [{\"tool_call_id\": \"...\", \"accurate\": <true|false>, \"reason\": \"...\"}], \"reason\": \"...\"}";

const TASK_ADHERENCE: &str = "Assess how well the agent adhered to the task the user gave it.

USER QUERY:
{{query}}

AGENT RESPONSE:
{{response}}

TOOL CALLS:
{{tool_calls}}

Score from 1 (off-task or contradicts the request) to 5 (fully on task, no unrequested detours).
Return JSON: {\"score\": <1-5>, \"reason\": \"...\"}";

static TEMPLATES: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);
    // Prompts are plain text; HTML escaping would mangle quotes in queries.
    hb.register_escape_fn(handlebars::no_escape);
    for (name, template) in [
        ("system", SYSTEM),
        (RubricKind::IntentResolution.as_str(), INTENT_RESOLUTION),
        (RubricKind::ToolCallAccuracy.as_str(), TOOL_CALL_ACCURACY),
        (RubricKind::TaskAdherence.as_str(), TASK_ADHERENCE),
    ] {
        if let Err(error) = hb.register_template_string(name, template) {
            tracing::error!(template = name, %error, "judge prompt template failed to compile");
        }
    }
    hb
});

fn template_data(payload: &RubricPayload) -> Result<Value, serde_json::Error> {
    let data = match payload {
        RubricPayload::IntentResolution { query, response } => json!({
            "rubric": RubricKind::IntentResolution.as_str(),
            "query": query,
            "response": response,
        }),
        RubricPayload::ToolCallAccuracy {
            query,
            tool_calls,
            tool_definitions,
        } => json!({
            "rubric": RubricKind::ToolCallAccuracy.as_str(),
            "query": query,
            "tool_calls": serde_json::to_string_pretty(tool_calls)?,
            "tool_definitions": serde_json::to_string_pretty(tool_definitions)?,
        }),
        RubricPayload::TaskAdherence {
            query,
            response,
            tool_calls,
        } => json!({
            "rubric": RubricKind::TaskAdherence.as_str(),
            "query": query,
            "response": response,
            "tool_calls": serde_json::to_string_pretty(tool_calls)?,
        }),
    };
    Ok(data)
}

/// Builds the system and user messages for one judge request.
pub fn render(payload: &RubricPayload) -> Result<Vec<ChatMessage>, String> {
    let data = template_data(payload).map_err(|error| error.to_string())?;
    let system = TEMPLATES
        .render("system", &data)
        .map_err(|error| error.to_string())?;
    let user = TEMPLATES
        .render(payload.kind().as_str(), &data)
        .map_err(|error| error.to_string())?;

    Ok(vec![ChatMessage::system(system), ChatMessage::user(user)])
}
