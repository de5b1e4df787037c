//! Error types for each layer of the pipeline.
//!
//! Only [`ConfigError`] and a reviewer failure ([`RunError::Reviewer`]) are
//! allowed to end a run abnormally. Everything else is absorbed by the
//! component that hit it and turned into a degraded finding.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or incomplete configuration. Fatal, raised before any graph work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("corpus path is not configured (set [corpus] path or pass --corpus)")]
    MissingCorpus,

    #[error("corpus file not found: {0}")]
    CorpusNotFound(PathBuf),

    #[error("failed to load corpus: {0}")]
    Corpus(#[from] CorpusError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("prompts.{name} is not a valid template: {message}")]
    Template { name: &'static str, message: String },
}

/// Failure reading the parsed document corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a language-model call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to model backend at {0}")]
    Connect(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse model response: {0}")]
    Parse(String),

    #[error("model output does not match the expected schema: {0}")]
    Schema(String),
}

/// Failure of a single Tool Bridge call.
///
/// `Timeout` is kept distinct from every tool-level outcome so callers can
/// tell "no answer in time" apart from "answered with nothing".
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn tool worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {timeout_ms}ms waiting for `{method}` response (id {id})")]
    Timeout {
        method: String,
        id: i64,
        timeout_ms: u64,
    },

    #[error("tool worker exited before answering `{0}`")]
    WorkerExited(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool reported failure: {0}")]
    ToolFailed(String),

    #[error("unexpected tool payload: {0}")]
    Payload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// True when the call failed only because the worker did not answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

/// Run-level failure surfaced to the caller of the orchestration graph.
///
/// Configuration problems never get this far: `Config::validate` rejects
/// them before a graph is built.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("reviewer failed to produce a final answer: {0}")]
    Reviewer(#[source] LlmError),

    #[error("run finished without a reviewed answer")]
    Unreviewed,
}
