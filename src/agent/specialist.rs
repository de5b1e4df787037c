//! Role-bound specialist agents (revenue, expenditure).
//!
//! A specialist runs a bounded tool-calling loop over the budget document,
//! then re-parses its summary into the role's single structured field.
//! Nothing in here fails the round: every error degrades to the best text
//! available.

use crate::agent::runner::{AgentLimits, ToolLoop};
use crate::agent::tools::{get_tool_definitions, truncate, SearchExecutor};
use crate::agent::DocumentSearch;
use crate::graph::state::{RunState, StateUpdate};
use crate::llm::{string_fields_schema, structured, ChatMessage, LanguageModel};
use crate::models::{Finding, Route};
use crate::prompts::Prompts;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Hits quoted in a fallback digest.
const DIGEST_HITS: usize = 5;

/// Which budget dimension a specialist covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialistRole {
    Revenue,
    Expenditure,
}

impl SpecialistRole {
    pub fn route(&self) -> Route {
        match self {
            SpecialistRole::Revenue => Route::RevenueNode,
            SpecialistRole::Expenditure => Route::ExpenditureNode,
        }
    }

    /// Field the summary is re-parsed into.
    pub fn field(&self) -> &'static str {
        match self {
            SpecialistRole::Revenue => "revenue_streams",
            SpecialistRole::Expenditure => "expenditure_streams",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecialistRole::Revenue => "revenue",
            SpecialistRole::Expenditure => "expenditure",
        }
    }

    fn system_prompt<'a>(&self, prompts: &'a Prompts) -> &'a str {
        match self {
            SpecialistRole::Revenue => &prompts.revenue,
            SpecialistRole::Expenditure => &prompts.expenditure,
        }
    }
}

pub struct Specialist {
    role: SpecialistRole,
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn DocumentSearch>,
    prompts: Arc<Prompts>,
    limits: AgentLimits,
}

impl Specialist {
    pub fn new(
        role: SpecialistRole,
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn DocumentSearch>,
        prompts: Arc<Prompts>,
        limits: AgentLimits,
    ) -> Self {
        Self {
            role,
            model,
            search,
            prompts,
            limits,
        }
    }

    /// Investigate the current query and return this role's update.
    pub async fn run(&self, state: &RunState) -> StateUpdate {
        info!("Running {} agent", self.role.name());
        let raw = self.investigate(&state.task_for_agent()).await;
        let finding = self.coerce(raw).await;
        StateUpdate {
            route: self.role.route(),
            finding,
        }
    }

    /// The tool loop. Returns the agent's raw summary.
    async fn investigate(&self, task: &str) -> String {
        let tools = get_tool_definitions();
        let mut executor = SearchExecutor::new(self.search.clone());
        let messages = vec![
            ChatMessage::system(self.role.system_prompt(&self.prompts)),
            ChatMessage::user(task),
        ];

        let answer = ToolLoop::new(self.model.as_ref(), self.limits, self.role.name())
            .run(messages, &tools, &mut executor)
            .await;

        match answer {
            Some(summary) => {
                info!(
                    "{} agent finished after {} searches",
                    self.role.name(),
                    executor.keywords().len()
                );
                summary
            }
            None => {
                warn!(
                    "{} agent stopped without a final summary; using search results",
                    self.role.name()
                );
                self.digest(&executor)
            }
        }
    }

    fn digest(&self, executor: &SearchExecutor) -> String {
        let hits = executor.hits();
        if hits.is_empty() {
            return format!(
                "No {} information was found in the document.",
                self.role.name()
            );
        }

        let mut text = format!(
            "Search results for {} (keywords: {}):",
            self.role.name(),
            executor.keywords().join(", ")
        );
        for hit in hits.iter().take(DIGEST_HITS) {
            text.push_str(&format!("\n[page {}] {}", hit.page, truncate(&hit.text, 300)));
        }
        text
    }

    /// Best-effort re-parse of the summary into the role's field.
    async fn coerce(&self, raw: String) -> Finding {
        let field = self.role.field();
        let schema = string_fields_schema(&[field]);
        let messages = [ChatMessage::user(self.prompts.reparse_request(field, &raw))];

        match structured::<Value>(self.model.as_ref(), &messages, &schema).await {
            Ok(value) => match value.get(field) {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    Finding::Structured(text.trim().to_string())
                }
                Some(other) if !other.is_null() && !other.is_string() => {
                    Finding::Structured(other.to_string())
                }
                _ => {
                    warn!("{} re-parse returned no '{}'; keeping raw text", self.role.name(), field);
                    Finding::Raw(raw)
                }
            },
            Err(e) => {
                warn!("{} re-parse failed: {}; keeping raw text", self.role.name(), e);
                Finding::Raw(raw)
            }
        }
    }
}
