//! budget-qa - question answering over a parsed government budget document
//!
//! A supervisor routes each question between revenue and expenditure
//! agents that search the document through out-of-process tools, then a
//! reviewer synthesizes the final answer.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Configuration error, reviewer failure, or any other fatal error

mod agent;
mod bridge;
mod cli;
mod config;
mod error;
mod graph;
mod llm;
mod models;
mod prompts;
mod report;
mod tools;

use agent::{AgentLimits, BridgeDates, BridgeSearch, DateAgent};
use anyhow::{Context, Result};
use bridge::{ToolBridge, ToolServer};
use cli::{Args, Mode, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use graph::Orchestrator;
use indicatif::{ProgressBar, ProgressStyle};
use llm::{LanguageModel, OllamaClient, OllamaConfig};
use prompts::Prompts;
use std::sync::Arc;
use std::time::Duration;
use tools::ToolName;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Log filter for tool workers, which have no CLI flags of their own.
const WORKER_LOG_ENV: &str = "BUDGET_QA_WORKER_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match args.mode() {
        // Handle --init-config early (no logging needed)
        Mode::InitConfig => return handle_init_config(),
        Mode::ServeTool(tool) => {
            init_worker_logging();
            return serve_tool(tool).await;
        }
        Mode::Search(_) | Mode::NormalizeDate(_) | Mode::DateStatus | Mode::Ask(_) => {}
    }

    // Initialize logging
    init_logging(&args);

    info!("budget-qa v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Run failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default budget-qa.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Point [corpus] path at your parsed budget document.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so stdout carries only the answer.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Worker logging: stderr only, stdout is the protocol channel.
fn init_worker_logging() {
    let filter = EnvFilter::try_from_env(WORKER_LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Handle --serve-tool: answer JSON-RPC on stdin/stdout until stdin closes.
async fn serve_tool(tool: ToolName) -> Result<()> {
    ToolServer::new(tool)
        .serve_stdio()
        .await
        .with_context(|| format!("Tool worker for {} failed", tool))
}

async fn run(args: Args) -> Result<()> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let bridge = Arc::new(ToolBridge::from_config(&config.bridge).context("Failed to set up tool bridge")?);

    match args.mode() {
        Mode::NormalizeDate(text) => handle_normalize_date(&bridge, &text).await,
        Mode::Search(keyword) => {
            let corpus_path = config.corpus_path()?;
            handle_search(&bridge, &keyword, corpus_path).await
        }
        Mode::DateStatus => handle_date_status(&args, &config, bridge).await,
        Mode::Ask(query) => ask(&args, &config, bridge, &query).await,
        Mode::InitConfig | Mode::ServeTool(_) => Ok(()),
    }
}

/// Handle --normalize-date: one bridge call, no model.
async fn handle_normalize_date(bridge: &ToolBridge, text: &str) -> Result<()> {
    let iso = bridge
        .normalize_date(text)
        .await
        .context("Date normalization failed")?;

    if iso.is_empty() {
        println!("(not a recognizable date)");
    } else {
        println!("{}", iso);
    }
    Ok(())
}

/// Handle --search: one bridge call, no model.
async fn handle_search(bridge: &ToolBridge, keyword: &str, corpus: &std::path::Path) -> Result<()> {
    let hits = bridge
        .search(keyword, corpus.to_path_buf())
        .await
        .context("Search failed")?;

    if hits.is_empty() {
        println!("No pages mention '{}'.", keyword);
        return Ok(());
    }

    println!("Found '{}' on {} page(s):\n", keyword, hits.len());
    for hit in &hits {
        let preview: String = hit.text.chars().take(200).collect();
        println!("  [page {}] {}", hit.page, preview.replace('\n', " "));
    }
    Ok(())
}

/// Answer one query with the full graph.
async fn ask(args: &Args, config: &Config, bridge: Arc<ToolBridge>, query: &str) -> Result<()> {
    // Corpus problems are fatal before any graph work
    let corpus = config.validate()?;
    let corpus_path = config.corpus_path()?.to_path_buf();
    info!(
        "Corpus {} loaded: {} elements on {} pages",
        corpus_path.display(),
        corpus.elements.len(),
        corpus.page_count()
    );

    let model: Arc<dyn LanguageModel> = Arc::new(
        OllamaClient::new(OllamaConfig::from(&config.model))
            .context("Failed to create model client")?,
    );
    let search = Arc::new(BridgeSearch::new(bridge, corpus_path));
    let prompts = Arc::new(Prompts::from_overrides(&config.prompts));
    let orchestrator = Orchestrator::new(model, search, prompts, &config.graph);

    info!("Model: {} at {}", config.model.name, config.model.ollama_url);
    info!("Max loop: {}", config.graph.max_loop);

    let preview: String = query.chars().take(60).collect();
    let spinner = args
        .show_progress()
        .then(|| start_spinner(format!("Answering: {}", preview)));
    let result = orchestrator.run(query).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let outcome = result?;

    let rendered = match args.format {
        OutputFormat::Text => report::generate_text_report(&outcome),
        OutputFormat::Markdown => report::generate_markdown_report(&outcome),
        OutputFormat::Json => report::generate_json_report(&outcome)?,
    };

    emit(args, &rendered)?;

    info!(
        "Answered in {:.1}s after {} rounds",
        outcome.duration_seconds, outcome.loop_count
    );
    Ok(())
}

/// Handle --date-status: label the dates on the target pages.
async fn handle_date_status(args: &Args, config: &Config, bridge: Arc<ToolBridge>) -> Result<()> {
    let corpus = config.validate()?;
    let pages = config.target_pages()?;
    info!("Assessing dates on pages {:?}", pages);

    let model: Arc<dyn LanguageModel> = Arc::new(
        OllamaClient::new(OllamaConfig::from(&config.model))
            .context("Failed to create model client")?,
    );
    let limits = AgentLimits {
        max_iterations: config.graph.max_agent_iterations,
        max_context_messages: config.graph.max_context_messages,
    };
    let agent = DateAgent::new(
        model,
        Arc::new(BridgeDates::new(bridge)),
        Arc::new(Prompts::from_overrides(&config.prompts)),
        limits,
        config.dates.reference_date,
    );

    let spinner = args
        .show_progress()
        .then(|| start_spinner(format!("Assessing dates on {} page(s)", pages.len())));
    let date_report = agent.run(&corpus, pages).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let rendered = match args.format {
        OutputFormat::Text => report::generate_date_text_report(&date_report),
        OutputFormat::Markdown => report::generate_date_markdown_report(&date_report),
        OutputFormat::Json => report::generate_date_json_report(&date_report)?,
    };
    emit(args, &rendered)?;

    if date_report.skipped > 0 {
        warn!("{} text blocks could not be assessed", date_report.skipped);
    }
    info!(
        "Found {} dates in {:.1}s",
        date_report.records.len(),
        date_report.duration_seconds
    );
    Ok(())
}

/// Write the rendered report to --output, or print it.
fn emit(args: &Args, rendered: &str) -> Result<()> {
    match args.output {
        Some(ref path) => {
            report::write_report(rendered, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !args.quiet {
                println!("Report saved to: {}", path.display());
            }
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn start_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    match ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        Ok(style) => spinner.set_style(style),
        Err(e) => warn!("Invalid spinner template: {}", e),
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
