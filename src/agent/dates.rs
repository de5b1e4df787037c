//! Date-status agent.
//!
//! For every text block on the target pages, a tool loop finds the
//! relevant date and normalizes it through the `normalize_date` tool, then
//! a structured call labels it Expired, Ongoing or Upcoming relative to the
//! reference date. A block whose status call fails is skipped, never fatal.

use crate::agent::runner::{AgentLimits, ToolExecutor, ToolLoop};
use crate::agent::tools::{string_argument, ToolResult};
use crate::bridge::ToolBridge;
use crate::error::BridgeError;
use crate::llm::{structured, ChatMessage, LanguageModel, ToolCallMessage, ToolDefinition};
use crate::models::{Corpus, DateRecord, DateReport, DateStatus};
use crate::prompts::Prompts;
use crate::tools::ToolName;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Free-text date to ISO date.
#[async_trait]
pub trait DateNormalizer: Send + Sync {
    async fn normalize(&self, date_string: &str) -> Result<String, BridgeError>;
}

/// Normalization through a worker process, one process per call.
pub struct BridgeDates {
    bridge: Arc<ToolBridge>,
}

impl BridgeDates {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DateNormalizer for BridgeDates {
    async fn normalize(&self, date_string: &str) -> Result<String, BridgeError> {
        self.bridge.normalize_date(date_string).await
    }
}

/// Executes the date agent's tool calls.
pub struct DateExecutor {
    normalizer: Arc<dyn DateNormalizer>,
    normalized: Vec<String>,
}

impl DateExecutor {
    pub fn new(normalizer: Arc<dyn DateNormalizer>) -> Self {
        Self {
            normalizer,
            normalized: Vec::new(),
        }
    }

    /// Most recent date the tool recognised.
    pub fn last_normalized(&self) -> Option<&str> {
        self.normalized.last().map(String::as_str)
    }

    async fn normalize_date(&mut self, args: &Value) -> ToolResult {
        let Some(date_string) = string_argument("date_string", args) else {
            return ToolResult::error("Missing required parameter: date_string".to_string());
        };

        match self.normalizer.normalize(&date_string).await {
            Ok(iso) if iso.is_empty() => {
                debug!("No date recognised in '{}'", date_string);
                ToolResult::success(format!(
                    "'{}' is not a recognizable date; pass a 'day month year' expression",
                    date_string
                ))
            }
            Ok(iso) => {
                debug!("Normalized '{}' to {}", date_string, iso);
                self.normalized.push(iso.clone());
                ToolResult::success(iso)
            }
            Err(e) => {
                warn!("Date normalization of '{}' failed: {}", date_string, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for DateExecutor {
    async fn execute(&mut self, call: &ToolCallMessage) -> ToolResult {
        let name = &call.function.name;
        match ToolName::from_wire_name(name) {
            Some(ToolName::NormalizeDate) => self.normalize_date(&call.function.arguments).await,
            _ => ToolResult::error(format!("Unknown tool: {}", name)),
        }
    }
}

/// Tool definitions offered to the date agent.
pub fn date_tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition::function(
        ToolName::NormalizeDate.wire_name(),
        ToolName::NormalizeDate.description(),
        json!({
            "type": "object",
            "properties": {
                "date_string": {
                    "type": "string",
                    "description": "A date as written, e.g. '16 February 2024'"
                }
            },
            "required": ["date_string"]
        }),
    )]
}

fn record_schema() -> Value {
    let statuses: Vec<&str> = DateStatus::ALL.iter().map(|s| s.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "original_text": { "type": "string" },
            "normalized_date": { "type": "string" },
            "status": { "type": "string", "enum": statuses }
        },
        "required": ["original_text", "normalized_date", "status"]
    })
}

pub struct DateAgent {
    model: Arc<dyn LanguageModel>,
    normalizer: Arc<dyn DateNormalizer>,
    prompts: Arc<Prompts>,
    limits: AgentLimits,
    reference_date: NaiveDate,
}

impl DateAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        normalizer: Arc<dyn DateNormalizer>,
        prompts: Arc<Prompts>,
        limits: AgentLimits,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            model,
            normalizer,
            prompts,
            limits,
            reference_date,
        }
    }

    /// Assess every non-empty text block on `pages`, in page order.
    pub async fn run(&self, corpus: &Corpus, pages: &[u32]) -> DateReport {
        let started = Instant::now();
        let mut records = Vec::new();
        let mut skipped = 0;

        for &page in pages {
            let blocks: Vec<&str> = corpus
                .elements
                .iter()
                .filter(|e| e.page == page)
                .map(|e| e.content_markdown.as_str())
                .filter(|text| !text.trim().is_empty())
                .collect();

            if blocks.is_empty() {
                warn!("Page {} has no text to assess", page);
                continue;
            }

            for text in blocks {
                match self.assess(text).await {
                    Some(mut record) => {
                        record.page = page;
                        records.push(record);
                    }
                    None => skipped += 1,
                }
            }
        }

        info!(
            "Assessed dates on {} pages: {} records, {} skipped",
            pages.len(),
            records.len(),
            skipped
        );

        DateReport {
            pages: pages.to_vec(),
            reference_date: self.reference_date,
            records,
            skipped,
            model_used: self.model.model_name().to_string(),
            finished_at: Utc::now(),
            duration_seconds: started.elapsed().as_secs_f64(),
        }
    }

    async fn assess(&self, text: &str) -> Option<DateRecord> {
        let normalized = self.normalize(text).await;

        let request = self.prompts.date_status_request(
            &normalized,
            text,
            &self.reference_date.to_string(),
        );
        match structured::<DateRecord>(
            self.model.as_ref(),
            &[ChatMessage::user(request)],
            &record_schema(),
        )
        .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Date status call failed: {}", e);
                None
            }
        }
    }

    /// The date agent's answer, else the last date the tool recognised.
    async fn normalize(&self, text: &str) -> String {
        let mut executor = DateExecutor::new(self.normalizer.clone());
        let messages = vec![
            ChatMessage::system(self.prompts.date_agent_system()),
            ChatMessage::user(format!("Text: {}", text)),
        ];

        let answer = ToolLoop::new(self.model.as_ref(), self.limits, "date")
            .run(messages, &date_tool_definitions(), &mut executor)
            .await;

        answer
            .or_else(|| executor.last_normalized().map(str::to_string))
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::LocalDates;
    use super::*;
    use crate::error::LlmError;
    use crate::llm::testing::ScriptedModel;
    use crate::models::PageElement;

    fn corpus() -> Corpus {
        let element = |page: u32, text: &str| PageElement {
            page,
            content_markdown: text.to_string(),
        };
        Corpus {
            metadata: json!({}),
            elements: vec![
                element(1, "Budget statement distributed on 16 February 2024."),
                element(2, "Estate duty was abolished on 15 Feb 2008."),
                element(2, "   "),
                element(3, "Revenue tables."),
            ],
        }
    }

    fn agent(model: Arc<ScriptedModel>, dates: Arc<LocalDates>) -> DateAgent {
        DateAgent::new(
            model,
            dates,
            Arc::new(Prompts::default()),
            AgentLimits::default(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
    }

    fn normalize_call(model: ScriptedModel, date: &str) -> ScriptedModel {
        model.tool_call("", "normalize_date", json!({ "date_string": date }))
    }

    #[tokio::test]
    async fn test_pages_are_normalized_then_labelled() {
        let mut model = normalize_call(ScriptedModel::new(), "16 February 2024")
            .chat_reply(ChatMessage::assistant("2024-02-16 (distributed on 16 February 2024)"))
            .json_reply(json!({
                "original_text": "Budget statement distributed on 16 February 2024.",
                "normalized_date": "2024-02-16",
                "status": "Upcoming"
            }));
        model = normalize_call(model, "15 Feb 2008")
            .chat_reply(ChatMessage::assistant("2008-02-15"))
            .json_reply(json!({
                "original_text": "Estate duty was abolished on 15 Feb 2008.",
                "normalized_date": "2008-02-15",
                "status": "Expired"
            }));
        let model = Arc::new(model);
        let dates = Arc::new(LocalDates::default());

        let report = agent(model.clone(), dates.clone()).run(&corpus(), &[1, 2]).await;

        assert_eq!(report.pages, vec![1, 2]);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].page, 1);
        assert_eq!(report.records[0].status, DateStatus::Upcoming);
        assert_eq!(report.records[1].page, 2);
        assert_eq!(report.records[1].normalized_date, "2008-02-15");
        assert_eq!(report.model_used, "scripted");
        assert_eq!(
            *dates.inputs.lock().unwrap(),
            vec!["16 February 2024", "15 Feb 2008"]
        );

        let chat_log = model.chat_log.lock().unwrap();
        assert_eq!(
            chat_log[0][1].content,
            "Text: Budget statement distributed on 16 February 2024."
        );
        assert!(chat_log[1].iter().any(|m| m.role == "tool" && m.content == "2024-02-16"));

        let json_log = model.json_log.lock().unwrap();
        assert!(json_log[0][0]
            .content
            .starts_with("Given the normalized date 2024-02-16 (distributed on 16 February 2024)"));
        assert!(json_log[1][0].content.contains("with respect to 2024-01-01"));
    }

    #[tokio::test]
    async fn test_tool_result_used_when_agent_gives_no_answer() {
        let model = Arc::new(
            normalize_call(ScriptedModel::new(), "16 February 2024")
                .chat_error(LlmError::Timeout(300))
                .json_reply(json!({
                    "original_text": "Budget statement distributed on 16 February 2024.",
                    "normalized_date": "2024-02-16",
                    "status": "Upcoming"
                })),
        );

        let report = agent(model.clone(), Arc::new(LocalDates::default()))
            .run(&corpus(), &[1])
            .await;
        assert_eq!(report.records.len(), 1);

        let json_log = model.json_log.lock().unwrap();
        assert!(json_log[0][0].content.starts_with("Given the normalized date 2024-02-16 and"));
    }

    #[tokio::test]
    async fn test_failed_status_call_is_skipped() {
        let model = Arc::new(
            ScriptedModel::new()
                .chat_reply(ChatMessage::assistant("no date here"))
                .json_error(LlmError::Schema("missing field `status`".to_string())),
        );

        let report = agent(model, Arc::new(LocalDates::default()))
            .run(&corpus(), &[3, 9])
            .await;
        assert!(report.records.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.pages, vec![3, 9]);
    }

    #[tokio::test]
    async fn test_executor_reports_unrecognised_dates() {
        let mut executor = DateExecutor::new(Arc::new(LocalDates::default()));
        let call = |args: Value| ToolCallMessage {
            function: crate::llm::ToolCallFunction {
                name: "normalize_date".to_string(),
                arguments: args,
            },
        };

        let result = executor.execute(&call(json!({"date_string": "yesterday"}))).await;
        assert!(result.success);
        assert!(result.output.contains("not a recognizable date"));
        assert_eq!(executor.last_normalized(), None);

        let result = executor.execute(&call(json!("1 Jan 2024"))).await;
        assert_eq!(result.output, "2024-01-01");
        assert_eq!(executor.last_normalized(), Some("2024-01-01"));

        let missing = executor.execute(&call(json!({}))).await;
        assert!(!missing.success);
    }

    #[test]
    fn test_date_tool_definition() {
        let defs = date_tool_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "normalize_date");
        assert_eq!(record_schema()["properties"]["status"]["enum"], json!(["Expired", "Ongoing", "Upcoming"]));
    }
}
