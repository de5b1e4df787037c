//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `budget-qa.toml` files.

use crate::error::ConfigError;
use crate::models::Corpus;
use crate::prompts::check_template;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "budget-qa.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Supervisor and specialist budgets.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Document corpus location.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Tool worker settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Date-status pass settings.
    #[serde(default)]
    pub dates: DatesConfig,

    /// Prompt text overrides.
    #[serde(default)]
    pub prompts: PromptOverrides,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name as known to the backend.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_timeout() -> u64 {
    300
}

/// Orchestration budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Specialist rounds allowed before the supervisor forces FINISH.
    #[serde(default = "default_max_loop")]
    pub max_loop: u32,

    /// Model turns a specialist may take inside its tool loop.
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: usize,

    /// Conversation messages kept in a specialist's sliding window.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    /// Entries kept in the past-actions log.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// How many previous routes the repeat guard looks at.
    #[serde(default = "default_repeat_window")]
    pub repeat_window: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_loop: default_max_loop(),
            max_agent_iterations: default_max_agent_iterations(),
            max_context_messages: default_max_context_messages(),
            history_limit: default_history_limit(),
            repeat_window: default_repeat_window(),
        }
    }
}

fn default_max_loop() -> u32 {
    5
}

fn default_max_agent_iterations() -> usize {
    10
}

fn default_max_context_messages() -> usize {
    20
}

fn default_history_limit() -> usize {
    6
}

fn default_repeat_window() -> usize {
    1
}

/// Where the parsed budget document lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Path to the corpus JSON (`{metadata, elements}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Pages the date-status pass reads.
    #[serde(default)]
    pub target_pages: Vec<u32>,
}

/// Tool worker process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Worker program. When unset the running binary serves its own tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Extra arguments placed before `--serve-tool <tool>`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Window for each response (handshake, call), in milliseconds.
    #[serde(default = "default_bridge_timeout")]
    pub timeout_ms: u64,

    /// Wait after closing a worker's stdin before killing it.
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_ms: default_bridge_timeout(),
            grace_ms: default_grace(),
        }
    }
}

fn default_bridge_timeout() -> u64 {
    3000
}

fn default_grace() -> u64 {
    1000
}

/// Date-status pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatesConfig {
    /// Dates before this are Expired, after it Upcoming.
    #[serde(default = "default_reference_date")]
    pub reference_date: NaiveDate,
}

impl Default for DatesConfig {
    fn default() -> Self {
        Self {
            reference_date: default_reference_date(),
        }
    }
}

fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

/// Replacement prompt templates (minijinja). Unset entries keep the
/// built-in wording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expenditure: Option<String>,

    /// Must reference `worker_info`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reparse: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_status: Option<String>,
}

impl PromptOverrides {
    /// Every override that is set, by name.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("revenue", &self.revenue),
            ("expenditure", &self.expenditure),
            ("supervisor", &self.supervisor),
            ("router", &self.router),
            ("reviewer", &self.reviewer),
            ("reparse", &self.reparse),
            ("date_agent", &self.date_agent),
            ("date_status", &self.date_status),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|text| (name, text)))
        .collect()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only explicitly provided CLI values override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(max_loop) = args.max_loop {
            self.graph.max_loop = max_loop;
        }
        if let Some(ref corpus) = args.corpus {
            self.corpus.path = Some(corpus.clone());
        }
        if !args.pages.is_empty() {
            self.corpus.target_pages = args.pages.clone();
        }
    }

    /// The configured corpus path, if it exists on disk.
    pub fn corpus_path(&self) -> Result<&Path, ConfigError> {
        let path = self.corpus.path.as_deref().ok_or(ConfigError::MissingCorpus)?;
        if !path.is_file() {
            return Err(ConfigError::CorpusNotFound(path.to_path_buf()));
        }
        Ok(path)
    }

    /// Check everything a run depends on, including that the corpus parses.
    pub fn validate(&self) -> Result<Corpus, ConfigError> {
        if !self.model.ollama_url.starts_with("http://")
            && !self.model.ollama_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "model.ollama_url must start with 'http://' or 'https://'".to_string(),
            ));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.name must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid(
                "model.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.model.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "model.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.graph.max_agent_iterations == 0 {
            return Err(ConfigError::Invalid(
                "graph.max_agent_iterations must be at least 1".to_string(),
            ));
        }
        if self.graph.max_context_messages < 2 {
            return Err(ConfigError::Invalid(
                "graph.max_context_messages must be at least 2".to_string(),
            ));
        }
        if self.graph.repeat_window == 0 {
            return Err(ConfigError::Invalid(
                "graph.repeat_window must be at least 1".to_string(),
            ));
        }
        if self.bridge.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bridge.timeout_ms must be at least 1".to_string(),
            ));
        }
        for (name, template) in self.prompts.entries() {
            check_template(template).map_err(|e| ConfigError::Template {
                name,
                message: e.to_string(),
            })?;
        }
        if let Some(ref supervisor) = self.prompts.supervisor {
            if !supervisor.contains("worker_info") {
                return Err(ConfigError::Invalid(
                    "prompts.supervisor must reference {{ worker_info }}".to_string(),
                ));
            }
        }

        let corpus = Corpus::load(self.corpus_path()?)?;
        Ok(corpus)
    }

    /// Pages for the date-status pass.
    pub fn target_pages(&self) -> Result<&[u32], ConfigError> {
        if self.corpus.target_pages.is_empty() {
            return Err(ConfigError::Invalid(
                "no target pages (set [corpus] target_pages or pass --pages)".to_string(),
            ));
        }
        Ok(&self.corpus.target_pages)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.corpus.path = Some(PathBuf::from("budget_structured.json"));
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
