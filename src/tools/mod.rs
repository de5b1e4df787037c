//! Capabilities served by out-of-process tool workers.
//!
//! Each worker process serves exactly one of these tools over the
//! JSON-RPC bridge (see [`crate::bridge`]).

pub mod dates;
pub mod search;

pub use dates::normalize_date;
pub use search::{search_budget_text, search_pages};

use serde_json::{json, Value};
use std::fmt;

/// Tools a worker process can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ToolName {
    /// Keyword search over the parsed budget document
    Search,
    /// Free-text date to ISO date
    NormalizeDate,
}

impl ToolName {
    /// Name the tool is registered under on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ToolName::Search => "search_budget_text",
            ToolName::NormalizeDate => "normalize_date",
        }
    }

    /// Look a tool up by its wire name.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "search_budget_text" => Some(ToolName::Search),
            "normalize_date" => Some(ToolName::NormalizeDate),
            _ => None,
        }
    }

    /// Value passed to `--serve-tool` to start a worker for this tool.
    pub fn cli_value(&self) -> &'static str {
        match self {
            ToolName::Search => "search",
            ToolName::NormalizeDate => "normalize-date",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::Search => {
                "Search parsed budget text JSON for a single keyword (e.g. revenue, expenditure, spending). Returns matching pages."
            }
            ToolName::NormalizeDate => {
                "Normalize budget-style dates such as '16 February 2024' to ISO YYYY-MM-DD. Returns an empty string when no date is found."
            }
        }
    }

    /// JSON schema of the tool's `arguments` object.
    pub fn input_schema(&self) -> Value {
        match self {
            ToolName::Search => json!({
                "type": "object",
                "properties": {
                    "keyword": {
                        "type": "string",
                        "description": "Keyword to search for (one word)"
                    },
                    "structured_json_path": {
                        "type": "string",
                        "description": "Path to the JSON file containing budget page elements"
                    }
                },
                "required": ["keyword", "structured_json_path"]
            }),
            ToolName::NormalizeDate => json!({
                "type": "object",
                "properties": {
                    "date_string": {
                        "type": "string",
                        "description": "Free-text date expression"
                    }
                },
                "required": ["date_string"]
            }),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
