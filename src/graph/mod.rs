//! Orchestration graph: supervisor ⇄ specialists, then review.
//!
//! One [`Orchestrator::run`] call owns one [`RunState`]. Rounds are strictly
//! sequential; a specialist's update is merged only after its whole turn.

pub mod reviewer;
pub mod state;
pub mod supervisor;

use state::RunState;
use supervisor::Supervisor;

use crate::agent::{AgentLimits, DocumentSearch, Specialist, SpecialistRole};
use crate::config::GraphConfig;
use crate::error::RunError;
use crate::llm::LanguageModel;
use crate::models::{Route, RunOutcome};
use crate::prompts::Prompts;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct Orchestrator {
    supervisor: Supervisor,
    revenue: Specialist,
    expenditure: Specialist,
    history_limit: usize,
    model_name: String,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn DocumentSearch>,
        prompts: Arc<Prompts>,
        graph: &GraphConfig,
    ) -> Self {
        let limits = AgentLimits {
            max_iterations: graph.max_agent_iterations,
            max_context_messages: graph.max_context_messages,
        };
        let specialist = |role| {
            Specialist::new(role, model.clone(), search.clone(), prompts.clone(), limits)
        };

        Self {
            revenue: specialist(SpecialistRole::Revenue),
            expenditure: specialist(SpecialistRole::Expenditure),
            supervisor: Supervisor::new(
                model.clone(),
                prompts.clone(),
                graph.max_loop,
                graph.repeat_window,
            ),
            history_limit: graph.history_limit,
            model_name: model.model_name().to_string(),
        }
    }

    /// Answer one query.
    pub async fn run(&self, query: &str) -> Result<RunOutcome, RunError> {
        info!("Starting graph execution");
        let started = Instant::now();
        let mut state = RunState::new(query, self.history_limit);

        loop {
            let command = self.supervisor.decide(&state).await?;
            let goto = command.goto;
            command.apply(&mut state);

            match goto {
                Route::RevenueNode => {
                    let update = self.revenue.run(&state).await;
                    state.apply(update);
                }
                Route::ExpenditureNode => {
                    let update = self.expenditure.run(&state).await;
                    state.apply(update);
                }
                Route::Finish => break,
            }
        }

        info!(
            "Graph finished after {} rounds: {}",
            state.loop_count, state.cur_reasoning
        );

        let answer = state.final_output.ok_or(RunError::Unreviewed)?;
        Ok(RunOutcome {
            query: state.query,
            answer,
            reasoning: state.cur_reasoning,
            loop_count: state.loop_count,
            routes: state.routes,
            revenue: state.revenue,
            expenditure: state.expenditure,
            history: state.history.into_iter().collect(),
            model_used: self.model_name.clone(),
            finished_at: Utc::now(),
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }
}
