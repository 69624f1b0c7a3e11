use std::collections::HashMap;

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    functions::{FunctionRegistry, ToolCall},
    LLMError,
};

/// Outcome of dispatching one model-requested tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Argument payload exactly as the model sent it.
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_errors: Vec<String>,
}

impl ToolCallResult {
    /// Content of the `tool` message fed back to the model.
    pub fn message_content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) if self.success => result.to_string(),
            (_, Some(error)) => json!({ "error": error }).to_string(),
            _ => Value::Null.to_string(),
        }
    }
}

/// Dispatches tool calls by name through a registry and records each outcome.
pub struct ToolExecutor {
    registry: FunctionRegistry,
    validators: HashMap<String, JSONSchema>,
}

impl ToolExecutor {
    pub fn new(registry: FunctionRegistry) -> Self {
        let validators = build_schema_validators(&registry);
        Self {
            registry,
            validators,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Runs every call in order. A failing call never stops the ones after it.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolCallResult {
        let name = call.function.name.clone();
        let schema_errors = if call.function.parse_error().is_some() {
            Vec::new()
        } else {
            self.validate(&name, &call.function.arguments)
        };

        let outcome = self.registry.invoke(&call.function).await;
        debug!(tool = %name, ok = outcome.is_ok(), "executed tool call");

        let (success, result, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(error) => (false, None, Some(error_message(error))),
        };

        ToolCallResult {
            call_id: call.id.clone().unwrap_or_default(),
            tool_name: name,
            success,
            result,
            error,
            arguments: call.function.raw(),
            schema_errors,
        }
    }

    fn validate(&self, tool_name: &str, arguments: &Value) -> Vec<String> {
        let Some(schema) = self.validators.get(tool_name) else {
            return Vec::new();
        };
        match schema.validate(arguments) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| e.to_string()).collect(),
        }
    }
}

fn error_message(error: LLMError) -> String {
    match error {
        LLMError::UnknownFunction(name) => format!("Unknown tool: {name}"),
        LLMError::InvalidFunctionArguments(message) => message,
        LLMError::FunctionExecution { message, .. } => message,
        other => other.to_string(),
    }
}

fn build_schema_validators(registry: &FunctionRegistry) -> HashMap<String, JSONSchema> {
    let mut map = HashMap::new();
    for def in registry.definitions() {
        let schema = match serde_json::to_value(&def.parameters) {
            Ok(schema) => schema,
            Err(error) => {
                warn!(tool = %def.name, %error, "could not serialise tool schema");
                continue;
            }
        };
        match JSONSchema::options().with_draft(Draft::Draft7).compile(&schema) {
            Ok(compiled) => {
                map.insert(def.name, compiled);
            }
            Err(error) => warn!(tool = %def.name, %error, "invalid tool schema"),
        }
    }
    map
}
