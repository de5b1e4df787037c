//! Prompt texts for the supervisor, specialists, reviewer and date agent.
//!
//! A [`Prompts`] value is built once from the defaults below plus any
//! `[prompts]` overrides, then handed to each component. Every prompt is a
//! minijinja template; overrides are arbitrary strings, so a fresh
//! [`minijinja::Environment`] is created per render.

use crate::config::PromptOverrides;
use crate::models::Route;
use minijinja::{context, Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::warn;

const REVENUE_PROMPT: &str = "You are the Revenue Agent. Search strictly for government revenue information.\n\
You will be given the user query and the actions taken so far; continue only with the search for revenue.\n\
Use `search_budget_text` to find information about revenue, taxes, NIRC or income.\n\
Search with keywords and synonyms such as revenue, income, GST, until you find the answer.\n\
Use exactly ONE keyword per search call, and try at least 5 different keywords.\n\
Summarize the key government revenue sources and their values.";

const EXPENDITURE_PROMPT: &str = "You are the Expenditure Agent. Search strictly for government expenditure information.\n\
You will be given the user query and the actions taken so far; continue only with the search for expenditure.\n\
Use `search_budget_text` to find information about government expenditure, spending or budgets.\n\
Search with keywords and synonyms such as expenditure, spending, fund or allocation.\n\
Use exactly ONE keyword per search call, and try at least 5 different keywords.\n\
Summarize fund allocations and how they are supported.";

const SUPERVISOR_PROMPT: &str = "You are a SUPERVISOR managing specialized government budget agents.\n\
{{ worker_info }}\n\n\
Choose which worker should act next. Each worker performs a task and returns results.\n\
When you believe the query is fully answered, route to FINISH.";

const ROUTER_PROMPT: &str = "USER QUERY:\n{{ user_query }}\n\n\
- Last node executed: {{ last_node }}\n\
- Current loop count: {{ loop_count }}\n\
- Current reasoning: {{ cur_reasoning }}\n\
- Revenue findings:\n{{ revenue }}\n\
- Expenditure findings:\n{{ expenditure }}\n\
Decide which worker should act next. Return JSON with fields \"next\" and \"reasoning\".";

const REVIEWER_PROMPT: &str = "Directly answer the query concisely using the revenue and expenditure information.\n\n\
REVENUE:\n{{ revenue }}\n\n\
EXPENDITURE:\n{{ expenditure }}\n\n\
QUERY:\n{{ user_query }}\n\n\
Return JSON with a single field \"direct_answer\".";

const REPARSE_PROMPT: &str = "Convert to JSON with field '{{ field }}': {{ raw }}";

const DATE_AGENT_PROMPT: &str = "INSTRUCTIONS:\n\
Find the date in the text that refers to when the document is distributed or when the estate duty applies.\n\
Normalize it to ISO format with the `normalize_date` tool, passing the date expression exactly as written.\n\
Reply with the normalized date and the sentence it came from.";

const DATE_STATUS_PROMPT: &str = "Given the normalized date {{ normalized }} and the text below, \
categorize the date as Expired, Ongoing or Upcoming with respect to {{ reference_date }}.\n\
Output the original text, the normalized date and the status.\n\
Text: {{ text }}";

/// Placeholder shown to the router and reviewer for a missing finding.
pub const EMPTY_PLACEHOLDER: &str = "<empty>";

/// Values substituted into the router prompt.
#[derive(Debug, Clone, Copy)]
pub struct RouterContext<'a> {
    pub user_query: &'a str,
    pub last_node: Option<Route>,
    pub loop_count: u32,
    pub cur_reasoning: &'a str,
    pub revenue: Option<&'a str>,
    pub expenditure: Option<&'a str>,
}

/// The full prompt set.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub revenue: String,
    pub expenditure: String,
    pub supervisor: String,
    pub router: String,
    pub reviewer: String,
    pub reparse: String,
    pub date_agent: String,
    pub date_status: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            revenue: REVENUE_PROMPT.to_string(),
            expenditure: EXPENDITURE_PROMPT.to_string(),
            supervisor: SUPERVISOR_PROMPT.to_string(),
            router: ROUTER_PROMPT.to_string(),
            reviewer: REVIEWER_PROMPT.to_string(),
            reparse: REPARSE_PROMPT.to_string(),
            date_agent: DATE_AGENT_PROMPT.to_string(),
            date_status: DATE_STATUS_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// Defaults with any configured overrides applied.
    pub fn from_overrides(overrides: &PromptOverrides) -> Self {
        let defaults = Self::default();
        let pick = |value: &Option<String>, default: String| value.clone().unwrap_or(default);
        Self {
            revenue: pick(&overrides.revenue, defaults.revenue),
            expenditure: pick(&overrides.expenditure, defaults.expenditure),
            supervisor: pick(&overrides.supervisor, defaults.supervisor),
            router: pick(&overrides.router, defaults.router),
            reviewer: pick(&overrides.reviewer, defaults.reviewer),
            reparse: pick(&overrides.reparse, defaults.reparse),
            date_agent: pick(&overrides.date_agent, defaults.date_agent),
            date_status: pick(&overrides.date_status, defaults.date_status),
        }
    }

    /// Supervisor system prompt listing every route and what it does.
    pub fn supervisor_system(&self) -> String {
        let worker_info = Route::ALL
            .iter()
            .map(|route| format!("WORKER: {}\nDESCRIPTION: {}", route, route.description()))
            .collect::<Vec<_>>()
            .join("\n\n");
        render(&self.supervisor, context! { worker_info })
    }

    pub fn router_request(&self, ctx: &RouterContext<'_>) -> String {
        let last_node = ctx.last_node.map(|r| r.as_str()).unwrap_or("None");
        let cur_reasoning = if ctx.cur_reasoning.is_empty() {
            "None"
        } else {
            ctx.cur_reasoning
        };
        render(
            &self.router,
            context! {
                user_query => ctx.user_query,
                last_node,
                loop_count => ctx.loop_count,
                cur_reasoning,
                revenue => or_placeholder(ctx.revenue),
                expenditure => or_placeholder(ctx.expenditure),
            },
        )
    }

    pub fn reviewer_request(
        &self,
        revenue: Option<&str>,
        expenditure: Option<&str>,
        user_query: &str,
    ) -> String {
        render(
            &self.reviewer,
            context! {
                revenue => or_placeholder(revenue),
                expenditure => or_placeholder(expenditure),
                user_query,
            },
        )
    }

    /// Instruction asking the model to restate `raw` as `{field: ...}`.
    pub fn reparse_request(&self, field: &str, raw: &str) -> String {
        render(&self.reparse, context! { field, raw })
    }

    /// System prompt of the date agent. Rendered so overrides may use
    /// template syntax, though no variables are offered.
    pub fn date_agent_system(&self) -> String {
        render(&self.date_agent, context! {})
    }

    /// Ask for `{original_text, normalized_date, status}` about one text block.
    pub fn date_status_request(&self, normalized: &str, text: &str, reference_date: &str) -> String {
        render(
            &self.date_status,
            context! { normalized, text, reference_date },
        )
    }
}

/// Check that a prompt template parses.
pub fn check_template(template: &str) -> Result<(), minijinja::Error> {
    let env = environment();
    env.template_from_str(template)?;
    Ok(())
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env
}

/// Render `template` with `ctx`. Undefined variables render empty.
///
/// Overrides are checked by `Config::validate`, so a failure here is a
/// runtime error inside the template; the raw template text is used instead.
fn render<S: Serialize>(template: &str, ctx: S) -> String {
    match environment().render_str(template, ctx) {
        Ok(text) => text,
        Err(e) => {
            warn!("Prompt template failed to render, using it verbatim: {}", e);
            template.to_string()
        }
    }
}

fn or_placeholder(value: Option<&str>) -> &str {
    match value {
        Some(text) if !text.trim().is_empty() => text,
        _ => EMPTY_PLACEHOLDER,
    }
}
