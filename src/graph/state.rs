//! Run state threaded through one query's execution.

use crate::models::{FinalAnswer, Finding, Route};
use std::collections::VecDeque;

/// Characters of a finding kept in a history entry.
const HISTORY_PREVIEW_CHARS: usize = 200;

/// Mutable record owned by the orchestrator for the duration of one query.
#[derive(Debug, Clone)]
pub struct RunState {
    /// The user's question. Never rewritten.
    pub query: String,
    pub revenue: Option<Finding>,
    pub expenditure: Option<Finding>,
    /// Supervisor's latest routing justification.
    pub cur_reasoning: String,
    /// Specialist rounds routed so far.
    pub loop_count: u32,
    /// Previous routing decision.
    pub last_node: Option<Route>,
    /// Every specialist route taken, in order.
    pub routes: Vec<Route>,
    /// Rolling log of prior actions, oldest first.
    pub history: VecDeque<String>,
    history_limit: usize,
    /// Set once, by the reviewer.
    pub final_output: Option<FinalAnswer>,
}

impl RunState {
    pub fn new(query: impl Into<String>, history_limit: usize) -> Self {
        Self {
            query: query.into(),
            revenue: None,
            expenditure: None,
            cur_reasoning: String::new(),
            loop_count: 0,
            last_node: None,
            routes: Vec::new(),
            history: VecDeque::new(),
            history_limit,
            final_output: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.final_output.is_some()
    }

    pub fn revenue_text(&self) -> Option<&str> {
        self.revenue.as_ref().map(Finding::text)
    }

    pub fn expenditure_text(&self) -> Option<&str> {
        self.expenditure.as_ref().map(Finding::text)
    }

    /// The last `window` specialist routes, newest last.
    pub fn recent_routes(&self, window: usize) -> &[Route] {
        let start = self.routes.len().saturating_sub(window);
        &self.routes[start..]
    }

    /// Task text for a specialist: the past-actions log followed by the query.
    pub fn task_for_agent(&self) -> String {
        let mut task = String::from("Past actions so far:");
        if self.history.is_empty() {
            task.push_str(" none");
        } else {
            for entry in &self.history {
                task.push_str("\n- ");
                task.push_str(entry);
            }
        }
        task.push_str("\n\nUser query: ");
        task.push_str(&self.query);
        task
    }

    /// Append to the history log, dropping the oldest entries past the limit.
    pub fn record(&mut self, entry: String) {
        if self.history_limit == 0 {
            return;
        }
        self.history.push_back(entry);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Merge a partial update produced by a specialist.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate { route, finding } = update;
        let entry = format!("{}: {}", route, preview(finding.text()));
        match route {
            Route::RevenueNode => self.revenue = Some(finding),
            Route::ExpenditureNode => self.expenditure = Some(finding),
            Route::Finish => return,
        }
        self.record(entry);
    }
}

/// A specialist's contribution to the run state: its own field only.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub route: Route,
    pub finding: Finding,
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > HISTORY_PREVIEW_CHARS {
        let cut: String = flat.chars().take(HISTORY_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
