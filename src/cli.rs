//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::tools::ToolName;
use clap::Parser;
use std::path::PathBuf;

/// budget-qa - ask questions about a government budget document
///
/// A supervisor routes the question between revenue and expenditure
/// agents that search the parsed document, then a reviewer writes the
/// final answer. Uses a local Ollama model.
///
/// Examples:
///   budget-qa --query "What happened to corporate income tax?" --corpus budget.json
///   budget-qa -q "How are the top-ups funded?" --format markdown -o answer.md
///   budget-qa --search "GST" --corpus budget.json
///   budget-qa --normalize-date "16 February 2024"
///   budget-qa --date-status --pages 1,2 --format json
///   budget-qa --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Question to answer
    #[arg(
        short,
        long,
        value_name = "TEXT",
        required_unless_present_any = ["init_config", "search", "normalize_date", "date_status", "serve_tool"]
    )]
    pub query: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for budget-qa.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Parsed budget document (JSON with metadata and page elements)
    #[arg(long, value_name = "FILE")]
    pub corpus: Option<PathBuf>,

    /// Ollama model to use
    ///
    /// Can also be set via BUDGET_QA_MODEL env var or budget-qa.toml config.
    #[arg(short, long, env = "BUDGET_QA_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Specialist rounds allowed before the supervisor stops
    #[arg(long, value_name = "COUNT")]
    pub max_loop: Option<u32>,

    /// Model request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output format (text, markdown, json)
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(long)]
    pub quiet: bool,

    /// Generate a default budget-qa.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Search the corpus for a keyword through the tool bridge and exit
    ///
    /// No language model is called.
    #[arg(long, value_name = "KEYWORD")]
    pub search: Option<String>,

    /// Normalize a free-text date through the tool bridge and exit
    #[arg(long, value_name = "TEXT")]
    pub normalize_date: Option<String>,

    /// Label the dates on the target pages as Expired, Ongoing or Upcoming
    #[arg(long)]
    pub date_status: bool,

    /// Pages for --date-status, comma separated (overrides [corpus] target_pages)
    #[arg(long, value_name = "PAGES", value_delimiter = ',')]
    pub pages: Vec<u32>,

    /// Serve one tool over JSON-RPC on stdin/stdout (worker mode)
    #[arg(long, value_name = "TOOL", hide = true)]
    pub serve_tool: Option<ToolName>,
}

/// Output format for the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `Final Result: <answer>` (default)
    #[default]
    Text,
    /// Markdown report
    Markdown,
    /// JSON run outcome
    Json,
}

/// What a single invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    InitConfig,
    ServeTool(ToolName),
    Search(String),
    NormalizeDate(String),
    DateStatus,
    Ask(String),
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The single action requested. Call after `validate`.
    pub fn mode(&self) -> Mode {
        if self.init_config {
            Mode::InitConfig
        } else if let Some(tool) = self.serve_tool {
            Mode::ServeTool(tool)
        } else if let Some(ref keyword) = self.search {
            Mode::Search(keyword.clone())
        } else if let Some(ref text) = self.normalize_date {
            Mode::NormalizeDate(text.clone())
        } else if self.date_status {
            Mode::DateStatus
        } else {
            Mode::Ask(self.query.clone().unwrap_or_default())
        }
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        let actions = [
            self.init_config,
            self.serve_tool.is_some(),
            self.search.is_some(),
            self.normalize_date.is_some(),
            self.date_status,
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if actions > 1 {
            return Err(
                "Use only one of --init-config, --search, --normalize-date, --date-status, --serve-tool"
                    .to_string(),
            );
        }

        if actions == 0 {
            match self.query.as_deref() {
                Some(query) if !query.trim().is_empty() => {}
                _ => return Err("Query must not be empty".to_string()),
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if !self.pages.is_empty() && !self.date_status {
            return Err("--pages only applies to --date-status".to_string());
        }

        if self.pages.contains(&0) {
            return Err("Page numbers start at 1".to_string());
        }

        if let Some(ref keyword) = self.search {
            if keyword.trim().is_empty() {
                return Err("Search keyword must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Whether a progress spinner should be drawn.
    pub fn show_progress(&self) -> bool {
        !self.quiet && (self.output.is_some() || self.format == OutputFormat::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            query: Some("What happened to corporate income tax?".to_string()),
            config: None,
            corpus: Some(PathBuf::from("budget.json")),
            model: None,
            ollama_url: None,
            max_loop: None,
            timeout: None,
            format: OutputFormat::Text,
            output: None,
            verbose: false,
            quiet: false,
            init_config: false,
            search: None,
            normalize_date: None,
            date_status: false,
            pages: Vec::new(),
            serve_tool: None,
        }
    }

    #[test]
    fn test_parse_query_flags() {
        let args = Args::try_parse_from([
            "budget-qa",
            "-q",
            "What is GST?",
            "--corpus",
            "budget.json",
            "--max-loop",
            "3",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.query.as_deref(), Some("What is GST?"));
        assert_eq!(args.max_loop, Some(3));
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.mode(), Mode::Ask("What is GST?".to_string()));
    }

    #[test]
    fn test_query_required_unless_tool_mode() {
        assert!(Args::try_parse_from(["budget-qa"]).is_err());

        let args = Args::try_parse_from(["budget-qa", "--serve-tool", "normalize-date"]).unwrap();
        assert_eq!(args.mode(), Mode::ServeTool(ToolName::NormalizeDate));

        let args = Args::try_parse_from(["budget-qa", "--search", "GST"]).unwrap();
        assert_eq!(args.mode(), Mode::Search("GST".to_string()));
    }

    #[test]
    fn test_date_status_flags() {
        let args =
            Args::try_parse_from(["budget-qa", "--date-status", "--pages", "1,2,5"]).unwrap();
        assert_eq!(args.pages, vec![1, 2, 5]);
        assert_eq!(args.mode(), Mode::DateStatus);
        assert!(args.validate().is_ok());

        let args = Args::try_parse_from(["budget-qa", "--date-status"]).unwrap();
        assert!(args.pages.is_empty());
        assert!(args.validate().is_ok());

        let mut args = make_args();
        args.pages = vec![1];
        assert!(args.validate().is_err());

        args.date_status = true;
        args.pages = vec![0, 1];
        assert!(args.validate().is_err());

        args.pages = vec![1];
        args.search = Some("GST".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.search = Some("GST".to_string());
        args.normalize_date = Some("1 Jan 2024".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut args = make_args();
        args.query = Some("   ".to_string());
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.ollama_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_show_progress() {
        let mut args = make_args();
        assert!(args.show_progress());

        args.format = OutputFormat::Json;
        assert!(!args.show_progress());

        args.output = Some(PathBuf::from("out.json"));
        assert!(args.show_progress());

        args.quiet = true;
        assert!(!args.show_progress());
    }
}
