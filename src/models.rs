//! Data models for the budget question-answering pipeline.
//!
//! This module contains the document corpus, search hits, routing
//! decisions, findings and the final run outcome.

use crate::error::CorpusError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Parsed budget document, as produced by the PDF loading step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    /// Source metadata (file name, OCR notes, ...). Never interpreted here.
    #[serde(default)]
    pub metadata: Value,
    /// Page elements in document order.
    #[serde(default)]
    pub elements: Vec<PageElement>,
}

/// One page worth of extracted markdown text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageElement {
    /// 1-indexed page number.
    #[serde(default)]
    pub page: u32,
    /// Page text, tables rendered as markdown.
    #[serde(default)]
    pub content_markdown: String,
}

impl Corpus {
    /// Load a corpus from its JSON file.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| CorpusError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Number of distinct pages in the corpus.
    pub fn page_count(&self) -> usize {
        let mut pages: Vec<u32> = self.elements.iter().map(|e| e.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages.len()
    }
}

/// A page matched by a keyword search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHit {
    pub page: u32,
    pub text: String,
}

/// A routing target chosen by the supervisor.
///
/// The wire names match what the routing model is asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "revenue_node")]
    RevenueNode,
    #[serde(rename = "expenditure_node")]
    ExpenditureNode,
    #[serde(rename = "FINISH")]
    Finish,
}

impl Route {
    /// All routes, in the order they are offered to the router.
    pub const ALL: [Route; 3] = [Route::RevenueNode, Route::ExpenditureNode, Route::Finish];

    /// Wire name of the route.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::RevenueNode => "revenue_node",
            Route::ExpenditureNode => "expenditure_node",
            Route::Finish => "FINISH",
        }
    }

    /// One-line description offered to the routing model.
    pub fn description(&self) -> &'static str {
        match self {
            Route::RevenueNode => "Handles revenue/tax/income-related queries.",
            Route::ExpenditureNode => "Handles expenditure/fund/budget-related queries.",
            Route::Finish => "Stop when query fully answered.",
        }
    }

    /// Whether this route runs a specialist agent.
    pub fn is_specialist(&self) -> bool {
        !matches!(self, Route::Finish)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output contract of the routing model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterDecision {
    pub next: Route,
    pub reasoning: String,
}

/// A specialist's finding.
///
/// `Structured` when the raw summary was successfully re-parsed into the
/// role's schema field, `Raw` when the re-parse failed and the summary is
/// kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum Finding {
    Structured(String),
    Raw(String),
}

impl Finding {
    /// The finding text regardless of how it was obtained.
    pub fn text(&self) -> &str {
        match self {
            Finding::Structured(text) | Finding::Raw(text) => text,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Finding::Structured(_))
    }
}

/// Structured output contract of the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub direct_answer: String,
}

/// Everything a caller gets back from one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// The user's question.
    pub query: String,
    /// The reviewer's direct answer.
    pub answer: FinalAnswer,
    /// Supervisor reasoning for the final decision.
    pub reasoning: String,
    /// Specialist rounds completed.
    pub loop_count: u32,
    /// Specialists executed, in order.
    pub routes: Vec<Route>,
    /// Latest revenue finding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<Finding>,
    /// Latest expenditure finding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expenditure: Option<Finding>,
    /// Rolling log of prior actions at termination.
    pub history: Vec<String>,
    /// Name of the model used.
    pub model_used: String,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
}

/// Where a document date falls relative to the reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateStatus {
    #[serde(alias = "expired", alias = "EXPIRED")]
    Expired,
    #[serde(alias = "ongoing", alias = "ONGOING")]
    Ongoing,
    #[serde(alias = "upcoming", alias = "UPCOMING")]
    Upcoming,
}

impl DateStatus {
    pub const ALL: [DateStatus; 3] = [DateStatus::Expired, DateStatus::Ongoing, DateStatus::Upcoming];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateStatus::Expired => "Expired",
            DateStatus::Ongoing => "Ongoing",
            DateStatus::Upcoming => "Upcoming",
        }
    }
}

impl fmt::Display for DateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated statement found on a target page.
///
/// Also the structured output contract of the date-status call, which
/// leaves `page` unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRecord {
    #[serde(default)]
    pub page: u32,
    /// The sentence containing the date.
    pub original_text: String,
    /// ISO `YYYY-MM-DD`, or empty when no date was recognised.
    pub normalized_date: String,
    pub status: DateStatus,
}

/// Result of a date-status pass over the target pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateReport {
    /// Pages requested, in the order they were read.
    pub pages: Vec<u32>,
    pub reference_date: NaiveDate,
    pub records: Vec<DateRecord>,
    /// Text blocks whose status call failed.
    pub skipped: usize,
    pub model_used: String,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_wire_names() {
        let route: Route = serde_json::from_str("\"revenue_node\"").unwrap();
        assert_eq!(route, Route::RevenueNode);
        let route: Route = serde_json::from_str("\"FINISH\"").unwrap();
        assert_eq!(route, Route::Finish);
        assert!(serde_json::from_str::<Route>("\"planner_node\"").is_err());
        assert_eq!(Route::ExpenditureNode.to_string(), "expenditure_node");
    }

    #[test]
    fn test_route_is_specialist() {
        assert!(Route::RevenueNode.is_specialist());
        assert!(Route::ExpenditureNode.is_specialist());
        assert!(!Route::Finish.is_specialist());
    }

    #[test]
    fn test_router_decision_parse() {
        let decision: RouterDecision = serde_json::from_str(
            r#"{"next": "expenditure_node", "reasoning": "need spending data"}"#,
        )
        .unwrap();
        assert_eq!(decision.next, Route::ExpenditureNode);
        assert_eq!(decision.reasoning, "need spending data");
    }

    #[test]
    fn test_date_record_from_model_output() {
        let record: DateRecord = serde_json::from_str(
            r#"{"original_text": "Budget distributed on 16 February 2024",
                "normalized_date": "2024-02-16", "status": "upcoming"}"#,
        )
        .unwrap();
        assert_eq!(record.page, 0);
        assert_eq!(record.status, DateStatus::Upcoming);
        assert_eq!(serde_json::to_value(record.status).unwrap(), "Upcoming");
        assert!(serde_json::from_str::<DateStatus>("\"Pending\"").is_err());
    }

    #[test]
    fn test_finding_text_and_tag() {
        let structured = Finding::Structured("GST $20b".to_string());
        let raw = Finding::Raw("some notes".to_string());
        assert_eq!(structured.text(), "GST $20b");
        assert!(structured.is_structured());
        assert!(!raw.is_structured());

        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["kind"], "raw");
        assert_eq!(json["text"], "some notes");
    }

    #[test]
    fn test_corpus_load_and_page_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.json");
        std::fs::write(
            &path,
            r#"{"metadata": {"source": "budget.pdf"},
                "elements": [
                    {"page": 1, "content_markdown": "Revenue"},
                    {"page": 1, "content_markdown": "Table"},
                    {"page": 2, "content_markdown": "Expenditure"}
                ]}"#,
        )
        .unwrap();

        let corpus = Corpus::load(&path).unwrap();
        assert_eq!(corpus.elements.len(), 3);
        assert_eq!(corpus.page_count(), 2);
        assert_eq!(corpus.metadata["source"], "budget.pdf");
    }

    #[test]
    fn test_corpus_load_missing_file() {
        let err = Corpus::load(Path::new("/nonexistent/budget.json")).unwrap_err();
        assert!(matches!(err, CorpusError::Read { .. }));
    }
}
