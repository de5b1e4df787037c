//! Tools exposed to the specialist agents.
//!
//! Specialists only see `search_budget_text(keyword)`; the corpus path is
//! bound here, not chosen by the model.

use crate::agent::runner::ToolExecutor;
use crate::bridge::ToolBridge;
use crate::error::BridgeError;
use crate::llm::{ToolCallMessage, ToolDefinition};
use crate::models::PageHit;
use crate::tools::ToolName;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters of a page shown to the model per hit.
const MAX_HIT_CHARS: usize = 1500;

/// Hits shown to the model per search.
const MAX_HITS_PER_RESULT: usize = 8;

/// Keyword search over the budget document.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, keyword: &str) -> Result<Vec<PageHit>, BridgeError>;
}

/// Search through a worker process, one process per call.
pub struct BridgeSearch {
    bridge: Arc<ToolBridge>,
    corpus_path: PathBuf,
}

impl BridgeSearch {
    pub fn new(bridge: Arc<ToolBridge>, corpus_path: PathBuf) -> Self {
        Self {
            bridge,
            corpus_path,
        }
    }
}

#[async_trait]
impl DocumentSearch for BridgeSearch {
    async fn search(&self, keyword: &str) -> Result<Vec<PageHit>, BridgeError> {
        self.bridge.search(keyword, self.corpus_path.clone()).await
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    /// Content of the `tool` message sent back to the model.
    pub fn into_message(self) -> String {
        if self.success {
            self.output
        } else {
            format!("Error: {}", self.error.unwrap_or_default())
        }
    }
}

/// Executes a specialist's tool calls and keeps what it found.
pub struct SearchExecutor {
    search: Arc<dyn DocumentSearch>,
    hits: Vec<PageHit>,
    keywords: Vec<String>,
}

impl SearchExecutor {
    pub fn new(search: Arc<dyn DocumentSearch>) -> Self {
        Self {
            search,
            hits: Vec::new(),
            keywords: Vec::new(),
        }
    }

    /// Distinct hits collected so far, in discovery order.
    pub fn hits(&self) -> &[PageHit] {
        &self.hits
    }

    /// Keywords searched so far.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn search_budget_text(&mut self, args: &Value) -> ToolResult {
        let Some(keyword) = string_argument("keyword", args) else {
            return ToolResult::error("Missing required parameter: keyword".to_string());
        };

        self.keywords.push(keyword.clone());
        match self.search.search(&keyword).await {
            Ok(hits) => {
                debug!("Search '{}' matched {} pages", keyword, hits.len());
                let output = format_hits(&keyword, &hits);
                for hit in hits {
                    if !self.hits.contains(&hit) {
                        self.hits.push(hit);
                    }
                }
                ToolResult::success(output)
            }
            Err(e) if e.is_timeout() => {
                warn!("Search '{}' timed out: {}", keyword, e);
                ToolResult::error(format!(
                    "search for '{}' timed out, try a different keyword",
                    keyword
                ))
            }
            Err(e) => {
                warn!("Search '{}' failed: {}", keyword, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for SearchExecutor {
    async fn execute(&mut self, call: &ToolCallMessage) -> ToolResult {
        let name = &call.function.name;
        let args = &call.function.arguments;

        debug!("Executing tool: {} with args: {:?}", name, args);

        match ToolName::from_wire_name(name) {
            Some(ToolName::Search) => self.search_budget_text(args).await,
            _ => ToolResult::error(format!("Unknown tool: {}", name)),
        }
    }
}

/// The single string argument `name` of a tool call.
///
/// Models sometimes send `{"keyword": ...}` as a JSON-encoded string, or
/// a bare string instead of an object.
pub(crate) fn string_argument(name: &str, args: &Value) -> Option<String> {
    let value = match args {
        Value::Object(map) => map.get(name).and_then(Value::as_str).map(str::to_string),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map.get(name).and_then(Value::as_str).map(str::to_string),
            _ => Some(text.clone()),
        },
        _ => None,
    }?;

    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn format_hits(keyword: &str, hits: &[PageHit]) -> String {
    if hits.is_empty() {
        return format!("No pages mention '{}'.", keyword);
    }

    let shown: Vec<Value> = hits
        .iter()
        .take(MAX_HITS_PER_RESULT)
        .map(|hit| json!({ "page": hit.page, "text": truncate(&hit.text, MAX_HIT_CHARS) }))
        .collect();
    let mut output = format!(
        "Pages mentioning '{}':\n{}",
        keyword,
        serde_json::to_string(&shown).unwrap_or_default()
    );
    if hits.len() > MAX_HITS_PER_RESULT {
        output.push_str(&format!(
            "\n({} more pages matched; refine the keyword to narrow results)",
            hits.len() - MAX_HITS_PER_RESULT
        ));
    }
    output
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Tool definitions offered to the specialists.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition::function(
        ToolName::Search.wire_name(),
        "Search the budget document for pages containing a keyword. \
         Pass exactly ONE keyword per call. Returns a list of {page, text} records.",
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "A single keyword, e.g. 'GST' or 'expenditure'"
                }
            },
            "required": ["keyword"]
        }),
    )]
}

#[cfg(test)]
pub mod testing {
    //! In-process search for agent and graph tests.

    use super::*;
    use crate::models::PageElement;
    use crate::tools::search_pages;
    use std::sync::Mutex;

    pub struct InMemorySearch {
        elements: Vec<PageElement>,
        pub queries: Mutex<Vec<String>>,
    }

    impl InMemorySearch {
        pub fn new(pages: &[(u32, &str)]) -> Self {
            Self {
                elements: pages
                    .iter()
                    .map(|(page, text)| PageElement {
                        page: *page,
                        content_markdown: text.to_string(),
                    })
                    .collect(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentSearch for InMemorySearch {
        async fn search(&self, keyword: &str) -> Result<Vec<PageHit>, BridgeError> {
            self.queries.lock().unwrap().push(keyword.to_string());
            Ok(search_pages(&self.elements, keyword))
        }
    }

    /// Every search times out.
    pub struct StalledSearch;

    #[async_trait]
    impl DocumentSearch for StalledSearch {
        async fn search(&self, _keyword: &str) -> Result<Vec<PageHit>, BridgeError> {
            Err(BridgeError::Timeout {
                method: "tools/call".to_string(),
                id: 1,
                timeout_ms: 3000,
            })
        }
    }
}
