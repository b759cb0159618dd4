use serde_json::{json, Value};

use crate::error::RegistryError;
use crate::functions::{
    json_schema_for, FnTool, FunctionDefinition, FunctionParameter, ToolRegistry,
};

const WEATHER: &[(&str, &str)] = &[
    ("Seattle", "Sunny, 25°C"),
    ("London", "Cloudy, 18°C"),
    ("Tokyo", "Rainy, 22°C"),
];

const FUN_FACTS: &[(&str, &str)] = &[
    ("Seattle", "Seattle is home to the first Starbucks, opened in 1971."),
    ("London", "The London Underground is the oldest subway system in the world."),
    ("Tokyo", "Tokyo is the most populous metropolitan area in the world."),
];

fn location_argument(arguments: &Value) -> Result<&str, String> {
    arguments
        .get("location")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'location' argument".to_string())
}

fn lookup(table: &[(&str, &'static str)], location: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(location))
        .map(|(_, value)| *value)
}

fn location_parameter(purpose: &str) -> FunctionParameter {
    FunctionParameter::new("location", json_schema_for::<String>())
        .with_description(format!("City to fetch {purpose} for."))
}

pub fn fetch_weather_definition() -> FunctionDefinition {
    FunctionDefinition::new("fetch_weather")
        .with_description("Fetch the current weather for a location.")
        .with_parameter(location_parameter("the weather"))
}

pub fn fetch_funfact_definition() -> FunctionDefinition {
    FunctionDefinition::new("fetch_funfact")
        .with_description("Fetch a fun fact about a location.")
        .with_parameter(location_parameter("a fun fact"))
}

/// Registers `fetch_weather` and `fetch_funfact` backed by a fixed table.
pub fn register_weather_tools(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        fetch_weather_definition(),
        FnTool::shared(|arguments| {
            let location = location_argument(arguments)?;
            let weather = lookup(WEATHER, location).unwrap_or("Weather data not available for this location.");
            Ok(json!({ "location": location, "weather": weather }))
        }),
    )?;

    registry.register(
        fetch_funfact_definition(),
        FnTool::shared(|arguments| {
            let location = location_argument(arguments)?;
            let fact = lookup(FUN_FACTS, location).unwrap_or("No fun fact available for this location.");
            Ok(json!({ "location": location, "fact": fact }))
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::functions::ToolCall;

    #[tokio::test]
    async fn weather_tools_answer_from_mock_table() {
        let mut registry = ToolRegistry::new();
        register_weather_tools(&mut registry).unwrap();

        let call = ToolCall::new("call_1", "fetch_weather", json!({ "location": "Seattle" }));
        let result = registry.invoke(&call).await.unwrap();
        assert_eq!(result["weather"], "Sunny, 25°C");

        let call = ToolCall::new("call_2", "fetch_funfact", json!({ "location": "Madrid" }));
        let result = registry.invoke(&call).await.unwrap();
        assert_eq!(result["fact"], "No fun fact available for this location.");
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = ToolRegistry::new();
        register_weather_tools(&mut registry).unwrap();
        assert!(matches!(
            register_weather_tools(&mut registry),
            Err(RegistryError::DuplicateTool(name)) if name == "fetch_weather"
        ));
    }
}
