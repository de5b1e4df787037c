//! Language-model capability used by the supervisor, specialists and reviewer.
//!
//! Components hold an `Arc<dyn LanguageModel>`; the production backend is
//! [`OllamaClient`]. Two call shapes are needed: a tool-enabled chat turn and
//! a single structured (JSON-schema constrained) completion.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaConfig};

use crate::error::LlmError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Message in the chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role("tool", content)
    }

    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    /// Tool calls requested by the model, if any.
    pub fn requested_calls(&self) -> &[ToolCallMessage] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: Value,
}

/// Tool definition in the function-calling format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// A chat-capable language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs and reports.
    fn model_name(&self) -> &str;

    /// One chat turn. The reply may contain tool calls.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError>;

    /// One completion constrained to `schema`, returned as parsed JSON.
    async fn complete_json(&self, messages: &[ChatMessage], schema: &Value)
        -> Result<Value, LlmError>;
}

/// Ask for a structured object and deserialize it into `T`.
pub async fn structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    messages: &[ChatMessage],
    schema: &Value,
) -> Result<T, LlmError> {
    let value = model.complete_json(messages, schema).await?;
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

/// Schema for an object of required string fields.
pub fn string_fields_schema(fields: &[&str]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields,
    })
}

/// Parse model text as JSON, tolerating markdown fences and surrounding prose.
pub fn parse_json_text(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(LlmError::Parse(format!("no JSON object in: {}", preview(trimmed))));
    };
    if end < start {
        return Err(LlmError::Parse(format!("no JSON object in: {}", preview(trimmed))));
    }

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| LlmError::Parse(e.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_fields_schema() {
        let schema = string_fields_schema(&["next", "reasoning"]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["next"]["type"], "string");
        assert_eq!(schema["required"], json!(["next", "reasoning"]));
    }

    #[test]
    fn test_parse_json_text_plain_and_fenced() {
        let plain = parse_json_text(r#"{"direct_answer": "42"}"#).unwrap();
        assert_eq!(plain["direct_answer"], "42");

        let fenced = parse_json_text("```json\n{\"next\": \"FINISH\", \"reasoning\": \"done\"}\n```").unwrap();
        assert_eq!(fenced["next"], "FINISH");

        assert!(parse_json_text("no json here").is_err());
        assert!(parse_json_text("} backwards {").is_err());
    }

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition::function("search_budget_text", "Search", json!({"type": "object"}));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "search_budget_text");
    }

    #[test]
    fn test_requested_calls_defaults_to_empty() {
        assert!(ChatMessage::assistant("done").requested_calls().is_empty());
    }

    #[tokio::test]
    async fn test_structured_reports_schema_mismatch() {
        let model = testing::ScriptedModel::new().json_reply(json!({"unexpected": true}));
        let result: Result<crate::models::FinalAnswer, _> =
            structured(&model, &[ChatMessage::user("q")], &json!({})).await;
        assert!(matches!(result, Err(LlmError::Schema(_))));
    }
}
