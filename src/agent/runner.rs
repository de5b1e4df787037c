//! Bounded tool-calling loop shared by the agents.

use crate::agent::tools::ToolResult;
use crate::llm::{ChatMessage, LanguageModel, ToolCallMessage, ToolDefinition};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Budgets for the tool loop.
#[derive(Debug, Clone, Copy)]
pub struct AgentLimits {
    /// Model turns per round.
    pub max_iterations: usize,
    /// Messages kept after the system prompt and task (sliding window).
    pub max_context_messages: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_context_messages: 20,
        }
    }
}

/// Runs the tool calls an agent's model asks for.
#[async_trait]
pub trait ToolExecutor: Send {
    async fn execute(&mut self, call: &ToolCallMessage) -> ToolResult;
}

/// One agent's conversation with the model.
pub struct ToolLoop<'a> {
    model: &'a dyn LanguageModel,
    limits: AgentLimits,
    label: &'a str,
}

impl<'a> ToolLoop<'a> {
    pub fn new(model: &'a dyn LanguageModel, limits: AgentLimits, label: &'a str) -> Self {
        Self {
            model,
            limits,
            label,
        }
    }

    /// Drive the model until it answers without calling a tool.
    ///
    /// Returns that answer, or `None` when the model failed, replied with
    /// nothing, or ran out of turns. Text sent alongside tool calls is
    /// narration, not an answer, and is never returned.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        executor: &mut dyn ToolExecutor,
    ) -> Option<String> {
        for iteration in 0..self.limits.max_iterations {
            debug!("{} agent iteration {}", self.label, iteration + 1);

            let reply = match self.model.chat(&messages, tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{} agent model call failed: {}", self.label, e);
                    return None;
                }
            };

            let calls = reply.requested_calls().to_vec();
            if calls.is_empty() {
                let text = reply.content.trim();
                return (!text.is_empty()).then(|| text.to_string());
            }

            messages.push(reply);
            for call in &calls {
                let result = executor.execute(call).await;
                messages.push(ChatMessage::tool(result.into_message()));
            }
            prune_old_messages(&mut messages, self.limits.max_context_messages);
        }

        warn!(
            "{} agent used all {} turns without answering",
            self.label, self.limits.max_iterations
        );
        None
    }
}

/// Keep the system prompt, the task and roughly the latest `max_context`
/// messages.
///
/// A `tool` message is never kept without the assistant turn that asked for
/// it, and the latest assistant turn is always kept.
fn prune_old_messages(messages: &mut Vec<ChatMessage>, max_context: usize) {
    let keep_start = 2;
    let max_keep = max_context + keep_start;

    if messages.len() <= max_keep {
        return;
    }

    let mut cut = messages.len() - max_context;
    while cut < messages.len() && messages[cut].role == "tool" {
        cut += 1;
    }
    if let Some(last_turn) = messages.iter().rposition(|m| m.role == "assistant") {
        cut = cut.min(last_turn.max(keep_start));
    }

    if cut > keep_start {
        messages.drain(keep_start..cut);
        debug!("Pruned {} old messages to save context", cut - keep_start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::ToolCallFunction;
    use serde_json::json;

    fn call_turn(keyword: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: String::new(),
            tool_calls: Some(vec![ToolCallMessage {
                function: ToolCallFunction {
                    name: "search_budget_text".to_string(),
                    arguments: json!({ "keyword": keyword }),
                },
            }]),
        }
    }

    fn conversation(rounds: &[&str]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("task")];
        for keyword in rounds {
            messages.push(call_turn(keyword));
            messages.push(ChatMessage::tool(format!("result for {}", keyword)));
        }
        messages
    }

    fn roles(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.role.as_str()).collect()
    }

    /// Echoes each call back as its result.
    struct EchoExecutor {
        calls: usize,
    }

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&mut self, call: &ToolCallMessage) -> ToolResult {
            self.calls += 1;
            ToolResult::success(call.function.arguments.to_string())
        }
    }

    #[test]
    fn test_prune_never_orphans_tool_results() {
        let mut messages = conversation(&["GST", "income", "tax"]);
        prune_old_messages(&mut messages, 3);

        assert_eq!(roles(&messages), vec!["system", "user", "assistant", "tool"]);
        assert_eq!(messages[0].content, "sys");
        assert_eq!(messages[1].content, "task");
        assert_eq!(messages[3].content, "result for tax");
    }

    #[test]
    fn test_prune_keeps_whole_recent_turns() {
        let mut messages = conversation(&["a", "b", "c", "d", "e"]);
        prune_old_messages(&mut messages, 4);

        assert_eq!(messages.len(), 6);
        assert_eq!(
            roles(&messages),
            vec!["system", "user", "assistant", "tool", "assistant", "tool"]
        );
        assert_eq!(messages[3].content, "result for d");
        assert_eq!(messages[5].content, "result for e");
    }

    #[test]
    fn test_prune_keeps_latest_turn_with_many_results() {
        let mut messages = conversation(&["a"]);
        messages.push(call_turn("b"));
        for i in 0..4 {
            messages.push(ChatMessage::tool(format!("b result {}", i)));
        }
        prune_old_messages(&mut messages, 2);

        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[6].content, "b result 3");
    }

    #[test]
    fn test_prune_leaves_short_conversations() {
        let mut messages = conversation(&["GST"]);
        prune_old_messages(&mut messages, 20);
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_answer_is_the_turn_without_calls() {
        let model = ScriptedModel::new()
            .search_call("GST")
            .chat_reply(ChatMessage::assistant("  GST rose.  "));
        let mut executor = EchoExecutor { calls: 0 };

        let answer = ToolLoop::new(&model, AgentLimits::default(), "test")
            .run(conversation(&[]), &[], &mut executor)
            .await;
        assert_eq!(answer.as_deref(), Some("GST rose."));
        assert_eq!(executor.calls, 1);
    }

    #[tokio::test]
    async fn test_narration_beside_tool_calls_is_not_an_answer() {
        let model = ScriptedModel::new()
            .tool_call("Let me search for GST.", "search_budget_text", json!({"keyword": "GST"}))
            .chat_reply(ChatMessage::assistant(""));
        let mut executor = EchoExecutor { calls: 0 };

        let answer = ToolLoop::new(&model, AgentLimits::default(), "test")
            .run(conversation(&[]), &[], &mut executor)
            .await;
        assert_eq!(answer, None);
    }

    #[tokio::test]
    async fn test_model_error_ends_loop() {
        let model = ScriptedModel::new().chat_error(LlmError::Timeout(300));
        let mut executor = EchoExecutor { calls: 0 };

        let answer = ToolLoop::new(&model, AgentLimits::default(), "test")
            .run(conversation(&[]), &[], &mut executor)
            .await;
        assert_eq!(answer, None);
        assert_eq!(model.chat_calls(), 1);
    }

    #[tokio::test]
    async fn test_turn_budget_is_enforced() {
        let mut model = ScriptedModel::new();
        for i in 0..5 {
            model = model.search_call(&format!("kw{}", i));
        }
        let mut executor = EchoExecutor { calls: 0 };
        let limits = AgentLimits {
            max_iterations: 3,
            max_context_messages: 20,
        };

        let answer = ToolLoop::new(&model, limits, "test")
            .run(conversation(&[]), &[], &mut executor)
            .await;
        assert_eq!(answer, None);
        assert_eq!(model.chat_calls(), 3);
        assert_eq!(executor.calls, 3);
    }
}
