//! Ollama `/api/chat` backend.

use super::{parse_json_text, ChatMessage, LanguageModel, ToolCallMessage, ToolDefinition};
use crate::config::ModelConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for OllamaConfig {
    fn from(model: &ModelConfig) -> Self {
        Self {
            ollama_url: model.ollama_url.trim_end_matches('/').to_string(),
            model_name: model.name.clone(),
            temperature: model.temperature,
            timeout_seconds: model.timeout_seconds,
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    options: OllamaOptions,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallMessage>>,
}

/// HTTP client for a local or remote Ollama server.
pub struct OllamaClient {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn request<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: &'a [ToolDefinition],
        format: Option<&'a Value>,
    ) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.config.model_name,
            messages,
            tools,
            stream: false,
            format,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        }
    }

    async fn send(&self, request: &OllamaChatRequest<'_>) -> Result<ResponseMessage, LlmError> {
        let url = format!("{}/api/chat", self.config.ollama_url);
        debug!(
            "Sending chat request with {} messages to {}",
            request.messages.len(),
            self.config.model_name
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout_seconds)
            } else {
                LlmError::Parse(e.to_string())
            }
        })?;

        Ok(chat_response.message)
    }

    fn classify(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_seconds)
        } else if e.is_connect() {
            LlmError::Connect(self.config.ollama_url.clone())
        } else {
            LlmError::Http(e)
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, LlmError> {
        let message = self.send(&self.request(messages, tools, None)).await?;
        Ok(ChatMessage {
            role: "assistant".to_string(),
            content: message.content,
            tool_calls: message.tool_calls.filter(|calls| !calls.is_empty()),
        })
    }

    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value, LlmError> {
        let message = self.send(&self.request(messages, &[], Some(schema))).await?;
        parse_json_text(&message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::string_fields_schema;

    fn client(url: &str) -> OllamaClient {
        OllamaClient::new(OllamaConfig {
            ollama_url: url.to_string(),
            model_name: "test-model".to_string(),
            temperature: 0.0,
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_config_from_model_config() {
        let model = ModelConfig {
            ollama_url: "http://gpu-box:11434/".to_string(),
            ..ModelConfig::default()
        };
        let config = OllamaConfig::from(&model);
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.model_name, model.name);
    }

    #[test]
    fn test_chat_request_shape() {
        let client = client("http://localhost:11434");
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let tools = vec![ToolDefinition::function(
            "search_budget_text",
            "Search",
            serde_json::json!({"type": "object"}),
        )];

        let value = serde_json::to_value(client.request(&messages, &tools, None)).unwrap();
        assert_eq!(value["model"], "test-model");
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["tools"][0]["function"]["name"], "search_budget_text");
        assert!(value.get("format").is_none());
    }

    #[test]
    fn test_structured_request_carries_schema() {
        let client = client("http://localhost:11434");
        let messages = vec![ChatMessage::user("route")];
        let schema = string_fields_schema(&["next", "reasoning"]);

        let value = serde_json::to_value(client.request(&messages, &[], Some(&schema))).unwrap();
        assert_eq!(value["format"]["required"][0], "next");
        assert!(value.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connect_error() {
        let client = client("http://127.0.0.1:9");
        let err = client
            .chat(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Connect(_) | LlmError::Http(_)));
    }
}
