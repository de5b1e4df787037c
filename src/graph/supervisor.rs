//! The supervisor: picks the next specialist or stops the run.
//!
//! Termination is guaranteed by two rules applied after the routing model
//! has spoken. A loop budget (`max_loop`) bypasses the model entirely once
//! reached, and the repeat guard turns a route that repeats a recent
//! specialist into FINISH.

use super::reviewer::Reviewer;
use super::state::RunState;
use crate::error::{LlmError, RunError};
use crate::llm::{structured, ChatMessage, LanguageModel};
use crate::models::{FinalAnswer, Route, RouterDecision};
use crate::prompts::{Prompts, RouterContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Reasoning recorded when the loop budget forces FINISH.
pub const MAX_LOOP_REASONING: &str = "Stopped after maximum allowed loops.";

/// Appended to the reasoning when the repeat guard fires.
pub const REPEAT_NOTE: &str = " (Stopped because same node repeated.)";

/// Outcome of one supervisor turn.
#[derive(Debug, Clone)]
pub struct Command {
    /// Where control goes next.
    pub goto: Route,
    /// Justification for `goto`.
    pub reasoning: String,
    /// Present exactly when `goto` is FINISH.
    pub final_output: Option<FinalAnswer>,
}

impl Command {
    /// Merge this decision into the run state.
    pub fn apply(self, state: &mut RunState) {
        state.cur_reasoning = self.reasoning;
        match self.goto {
            Route::RevenueNode | Route::ExpenditureNode => {
                state.loop_count += 1;
                state.last_node = Some(self.goto);
                state.routes.push(self.goto);
            }
            Route::Finish => state.final_output = self.final_output,
        }
    }
}

pub struct Supervisor {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<Prompts>,
    reviewer: Reviewer,
    max_loop: u32,
    repeat_window: usize,
}

impl Supervisor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<Prompts>,
        max_loop: u32,
        repeat_window: usize,
    ) -> Self {
        let reviewer = Reviewer::new(model.clone(), prompts.clone());
        Self {
            model,
            prompts,
            reviewer,
            max_loop,
            repeat_window: repeat_window.max(1),
        }
    }

    /// Decide the next step. Only a reviewer failure is an error.
    pub async fn decide(&self, state: &RunState) -> Result<Command, RunError> {
        info!("[Supervisor loop {}] deciding next worker", state.loop_count);

        let (mut goto, mut reasoning) = if state.loop_count >= self.max_loop {
            info!("Max loop count reached, ending run");
            (Route::Finish, MAX_LOOP_REASONING.to_string())
        } else {
            match self.route(state).await {
                Ok(decision) => (decision.next, decision.reasoning),
                Err(e) => {
                    warn!("Routing failed: {}", e);
                    (Route::Finish, format!("stopped because routing failed: {}", e))
                }
            }
        };

        info!("Supervisor routed to: {}", goto);
        info!("Reasoning: {}", reasoning);

        if self.repeats(state, goto) {
            warn!("Route {} repeated, forcing FINISH", goto);
            goto = Route::Finish;
            reasoning.push_str(REPEAT_NOTE);
        }

        let final_output = match goto {
            Route::Finish => Some(
                self.reviewer
                    .review(state.revenue_text(), state.expenditure_text(), &state.query)
                    .await
                    .map_err(RunError::Reviewer)?,
            ),
            Route::RevenueNode | Route::ExpenditureNode => None,
        };

        Ok(Command {
            goto,
            reasoning,
            final_output,
        })
    }

    /// Whether routing to `goto` would repeat a recent specialist.
    fn repeats(&self, state: &RunState, goto: Route) -> bool {
        goto.is_specialist()
            && (state.last_node == Some(goto)
                || state.recent_routes(self.repeat_window).contains(&goto))
    }

    async fn route(&self, state: &RunState) -> Result<RouterDecision, LlmError> {
        let messages = [
            ChatMessage::system(self.prompts.supervisor_system()),
            ChatMessage::user(self.prompts.router_request(&RouterContext {
                user_query: &state.query,
                last_node: state.last_node,
                loop_count: state.loop_count,
                cur_reasoning: &state.cur_reasoning,
                revenue: state.revenue_text(),
                expenditure: state.expenditure_text(),
            })),
        ];
        structured(self.model.as_ref(), &messages, &router_schema()).await
    }
}

fn router_schema() -> Value {
    let routes: Vec<&str> = Route::ALL.iter().map(Route::as_str).collect();
    json!({
        "type": "object",
        "properties": {
            "next": { "type": "string", "enum": routes },
            "reasoning": { "type": "string" }
        },
        "required": ["next", "reasoning"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::Finding;

    fn supervisor(model: Arc<ScriptedModel>, max_loop: u32, repeat_window: usize) -> Supervisor {
        Supervisor::new(model, Arc::new(Prompts::default()), max_loop, repeat_window)
    }

    fn route_reply(next: &str, reasoning: &str) -> Value {
        json!({ "next": next, "reasoning": reasoning })
    }

    #[tokio::test]
    async fn test_routes_to_specialist_without_review() {
        let model = Arc::new(
            ScriptedModel::new().json_reply(route_reply("revenue_node", "tax question")),
        );
        let sup = supervisor(model.clone(), 5, 1);
        let mut state = RunState::new("What happened to corporate income tax?", 6);

        let command = sup.decide(&state).await.unwrap();
        assert_eq!(command.goto, Route::RevenueNode);
        assert!(command.final_output.is_none());
        assert_eq!(model.json_calls(), 1);

        command.apply(&mut state);
        assert_eq!(state.loop_count, 1);
        assert_eq!(state.last_node, Some(Route::RevenueNode));
        assert_eq!(state.cur_reasoning, "tax question");
        assert!(!state.is_done());
    }

    #[tokio::test]
    async fn test_router_prompt_carries_state() {
        let model = Arc::new(
            ScriptedModel::new().json_reply(route_reply("expenditure_node", "need spending")),
        );
        let sup = supervisor(model.clone(), 5, 1);
        let mut state = RunState::new("q", 6);
        state.loop_count = 1;
        state.last_node = Some(Route::RevenueNode);
        state.routes.push(Route::RevenueNode);
        state.revenue = Some(Finding::Structured("GST $20b".to_string()));

        sup.decide(&state).await.unwrap();

        let log = model.json_log.lock().unwrap();
        assert_eq!(log[0][0].role, "system");
        assert!(log[0][0].content.contains("WORKER: revenue_node"));
        let prompt = &log[0][1].content;
        assert!(prompt.contains("Last node executed: revenue_node"));
        assert!(prompt.contains("Current loop count: 1"));
        assert!(prompt.contains("GST $20b"));
        assert!(prompt.contains("Expenditure findings:\n<empty>"));
    }

    #[tokio::test]
    async fn test_max_loop_bypasses_router() {
        let model = Arc::new(ScriptedModel::new().json_reply(json!({"direct_answer": "done"})));
        let sup = supervisor(model.clone(), 2, 1);
        let mut state = RunState::new("q", 6);
        state.loop_count = 2;

        let command = sup.decide(&state).await.unwrap();
        assert_eq!(command.goto, Route::Finish);
        assert_eq!(command.reasoning, MAX_LOOP_REASONING);
        assert_eq!(model.json_calls(), 1);
        assert!(model.json_log.lock().unwrap()[0][0].content.contains("REVENUE:"));

        command.apply(&mut state);
        assert_eq!(state.loop_count, 2);
        assert!(state.is_done());
    }

    #[tokio::test]
    async fn test_repeat_guard_forces_finish() {
        let model = Arc::new(
            ScriptedModel::new()
                .json_reply(route_reply("revenue_node", "more revenue"))
                .json_reply(json!({"direct_answer": "answer"})),
        );
        let sup = supervisor(model, 5, 1);
        let mut state = RunState::new("q", 6);
        state.loop_count = 1;
        state.last_node = Some(Route::RevenueNode);
        state.routes.push(Route::RevenueNode);

        let command = sup.decide(&state).await.unwrap();
        assert_eq!(command.goto, Route::Finish);
        assert_eq!(command.reasoning, format!("more revenue{}", REPEAT_NOTE));
        assert_eq!(command.final_output.unwrap().direct_answer, "answer");
    }

    #[tokio::test]
    async fn test_repeat_window_catches_oscillation() {
        let model = Arc::new(
            ScriptedModel::new()
                .json_reply(route_reply("revenue_node", "back to revenue"))
                .json_reply(json!({"direct_answer": "answer"})),
        );
        let mut state = RunState::new("q", 6);
        state.loop_count = 2;
        state.last_node = Some(Route::ExpenditureNode);
        state.routes = vec![Route::RevenueNode, Route::ExpenditureNode];

        let wide = supervisor(model, 5, 2);
        assert_eq!(wide.decide(&state).await.unwrap().goto, Route::Finish);

        let narrow_model = Arc::new(
            ScriptedModel::new().json_reply(route_reply("revenue_node", "back to revenue")),
        );
        let narrow = supervisor(narrow_model, 5, 1);
        assert_eq!(narrow.decide(&state).await.unwrap().goto, Route::RevenueNode);
    }

    #[tokio::test]
    async fn test_router_failure_finishes_with_review() {
        let model = Arc::new(
            ScriptedModel::new()
                .json_reply(json!({"next": "planner_node", "reasoning": "?"}))
                .json_reply(json!({"direct_answer": "partial answer"})),
        );
        let sup = supervisor(model, 5, 1);
        let command = sup.decide(&RunState::new("q", 6)).await.unwrap();

        assert_eq!(command.goto, Route::Finish);
        assert!(command.reasoning.starts_with("stopped because routing failed:"));
        assert_eq!(command.final_output.unwrap().direct_answer, "partial answer");
    }

    #[tokio::test]
    async fn test_reviewer_failure_is_fatal() {
        let model = Arc::new(
            ScriptedModel::new()
                .json_reply(route_reply("FINISH", "answered"))
                .json_error(LlmError::Connect("http://localhost:11434".to_string())),
        );
        let sup = supervisor(model, 5, 1);
        let err = sup.decide(&RunState::new("q", 6)).await.unwrap_err();
        assert!(matches!(err, RunError::Reviewer(LlmError::Connect(_))));
    }

    #[test]
    fn test_router_schema_offers_all_routes() {
        let schema = router_schema();
        assert_eq!(
            schema["properties"]["next"]["enum"],
            json!(["revenue_node", "expenditure_node", "FINISH"])
        );
    }
}
