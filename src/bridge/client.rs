//! Bridge client: one short-lived worker process per tool call.
//!
//! Each call spawns the worker, performs the `initialize` handshake, sends a
//! single `tools/call`, waits for the response with the matching id and then
//! shuts the worker down (close stdin, wait for the grace period, kill).

use crate::bridge::protocol::*;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::models::PageHit;
use crate::tools::ToolName;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

const INITIALIZE_ID: i64 = 0;
const CALL_ID: i64 = 1;

/// One tool invocation and its keyword arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Search {
        keyword: String,
        structured_json_path: PathBuf,
    },
    NormalizeDate {
        date_string: String,
    },
}

impl ToolCall {
    pub fn tool(&self) -> ToolName {
        match self {
            ToolCall::Search { .. } => ToolName::Search,
            ToolCall::NormalizeDate { .. } => ToolName::NormalizeDate,
        }
    }

    /// The `arguments` map sent in `tools/call`.
    pub fn arguments(&self) -> Value {
        match self {
            ToolCall::Search {
                keyword,
                structured_json_path,
            } => json!({
                "keyword": keyword,
                "structured_json_path": structured_json_path.display().to_string(),
            }),
            ToolCall::NormalizeDate { date_string } => json!({ "date_string": date_string }),
        }
    }
}

/// A bare string is a date to normalize.
impl From<&str> for ToolCall {
    fn from(date_string: &str) -> Self {
        ToolCall::NormalizeDate {
            date_string: date_string.to_string(),
        }
    }
}

/// Payload extracted from a `tools/call` result envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// Text of the first content block.
    Text(String),
    /// Content blocks as returned, when the first one carries no text.
    Content(Vec<Value>),
}

/// How to launch the worker for one tool.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// This executable, started in worker mode for `tool`.
    pub fn self_hosted(tool: ToolName) -> Result<Self, BridgeError> {
        let exe = std::env::current_exe()?;
        Ok(Self {
            program: exe.display().to_string(),
            args: vec!["--serve-tool".to_string(), tool.cli_value().to_string()],
        })
    }
}

/// Request/response access to the out-of-process tools.
#[derive(Debug, Clone)]
pub struct ToolBridge {
    workers: HashMap<ToolName, WorkerCommand>,
    timeout: Duration,
    grace_period: Duration,
}

impl ToolBridge {
    /// Build a bridge from configuration. Without an explicit program the
    /// workers are this executable in `--serve-tool` mode.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let mut bridge = Self::new(
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.grace_ms),
        );
        for tool in [ToolName::Search, ToolName::NormalizeDate] {
            let command = match &config.program {
                Some(program) => {
                    let mut args = config.args.clone();
                    args.push("--serve-tool".to_string());
                    args.push(tool.cli_value().to_string());
                    WorkerCommand {
                        program: program.clone(),
                        args,
                    }
                }
                None => WorkerCommand::self_hosted(tool)?,
            };
            bridge = bridge.with_worker(tool, command);
        }

        Ok(bridge)
    }

    /// A bridge with no workers registered yet.
    pub fn new(timeout: Duration, grace_period: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            timeout,
            grace_period,
        }
    }

    /// Register (or replace) the worker used for `tool`.
    pub fn with_worker(mut self, tool: ToolName, command: WorkerCommand) -> Self {
        self.workers.insert(tool, command);
        self
    }

    /// Perform one tool call in a fresh worker process.
    pub async fn call(&self, call: impl Into<ToolCall>) -> Result<ToolPayload, BridgeError> {
        let call = call.into();
        let tool = call.tool();
        let worker = self
            .workers
            .get(&tool)
            .ok_or_else(|| BridgeError::ToolFailed(format!("no worker registered for {}", tool)))?;

        debug!("Spawning {} worker: {} {:?}", tool, worker.program, worker.args);

        let mut child = Command::new(&worker.program)
            .args(&worker.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: worker.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::WorkerExited("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::WorkerExited("stdout unavailable".to_string()))?;
        let mut reader = BufReader::new(stdout);

        let outcome = self.exchange(&mut stdin, &mut reader, &call).await;
        self.terminate(child, stdin).await;

        match &outcome {
            Ok(_) => info!("Tool {} completed", tool),
            Err(e) => warn!("Tool {} failed: {}", tool, e),
        }
        outcome
    }

    /// Search the corpus for `keyword`.
    pub async fn search(
        &self,
        keyword: &str,
        structured_json_path: PathBuf,
    ) -> Result<Vec<PageHit>, BridgeError> {
        let payload = self
            .call(ToolCall::Search {
                keyword: keyword.to_string(),
                structured_json_path,
            })
            .await?;
        hits_from_payload(payload)
    }

    /// Normalize a free-text date; an empty string means "not a date".
    pub async fn normalize_date(&self, date_string: &str) -> Result<String, BridgeError> {
        match self.call(date_string).await? {
            ToolPayload::Text(text) => Ok(text),
            ToolPayload::Content(blocks) if blocks.is_empty() => Ok(String::new()),
            ToolPayload::Content(blocks) => Err(BridgeError::Payload(format!(
                "expected a date string, got {} content block(s)",
                blocks.len()
            ))),
        }
    }

    async fn exchange<W, R>(
        &self,
        writer: &mut W,
        reader: &mut R,
        call: &ToolCall,
    ) -> Result<ToolPayload, BridgeError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncBufRead + Unpin,
    {
        let init = JsonRpcRequest::new(
            INITIALIZE_ID,
            METHOD_INITIALIZE,
            Some(serde_json::to_value(InitializeParams {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: json!({}),
                client_info: ClientInfo {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            })?),
        );
        write_message(writer, &init).await?;
        let handshake = read_response(reader, INITIALIZE_ID, METHOD_INITIALIZE, self.timeout).await?;
        if let Some(err) = handshake.error {
            return Err(BridgeError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        write_message(writer, &JsonRpcNotification::new(METHOD_INITIALIZED)).await?;

        let request = JsonRpcRequest::new(
            CALL_ID,
            METHOD_TOOLS_CALL,
            Some(json!({
                "name": call.tool().wire_name(),
                "arguments": call.arguments(),
            })),
        );
        write_message(writer, &request).await?;
        let response = read_response(reader, CALL_ID, METHOD_TOOLS_CALL, self.timeout).await?;

        if let Some(err) = response.error {
            return Err(BridgeError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| BridgeError::Payload("response has neither result nor error".to_string()))?;

        extract_payload(serde_json::from_value(result)?)
    }

    /// Close stdin so the worker can exit on its own, then kill it if it is
    /// still running after the grace period.
    async fn terminate(&self, mut child: Child, stdin: ChildStdin) {
        drop(stdin);

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => debug!("Tool worker exited: {}", status),
            Ok(Err(e)) => warn!("Failed to wait for tool worker: {}", e),
            Err(_) => {
                debug!(
                    "Tool worker still running after {}ms, killing",
                    self.grace_period.as_millis()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tool worker: {}", e);
                }
            }
        }
    }
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read lines until the response for `id` arrives.
///
/// Non-JSON lines and responses for other ids are skipped. The whole wait
/// is bounded by `timeout`.
pub(crate) async fn read_response<R>(
    reader: &mut R,
    id: i64,
    method: &str,
    timeout: Duration,
) -> Result<JsonRpcResponse, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    tokio::time::timeout(timeout, read_matching(reader, id, method))
        .await
        .map_err(|_| BridgeError::Timeout {
            method: method.to_string(),
            id,
            timeout_ms: timeout.as_millis() as u64,
        })?
}

async fn read_matching<R>(reader: &mut R, id: i64, method: &str) -> Result<JsonRpcResponse, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BridgeError::WorkerExited(method.to_string()));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) if response.answers(id) => return Ok(response),
            Ok(_) => debug!("Skipping message not addressed to id {}", id),
            Err(_) => debug!("Skipping non-JSON-RPC line from worker: {}", trimmed),
        }
    }
}

fn extract_payload(result: CallToolResult) -> Result<ToolPayload, BridgeError> {
    if result.is_error {
        let message = result.first_text().unwrap_or("unknown tool error").to_string();
        return Err(BridgeError::ToolFailed(message));
    }

    match result.first_text() {
        Some(text) => Ok(ToolPayload::Text(text.to_string())),
        None => Ok(ToolPayload::Content(result.content)),
    }
}

/// Decode search hits from either a JSON text block or raw record blocks.
fn hits_from_payload(payload: ToolPayload) -> Result<Vec<PageHit>, BridgeError> {
    match payload {
        ToolPayload::Text(text) => {
            let value: Value = serde_json::from_str(&text)?;
            match value {
                Value::Array(_) => Ok(serde_json::from_value(value)?),
                Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
                other => Err(BridgeError::Payload(format!(
                    "expected search hits, got {}",
                    other
                ))),
            }
        }
        ToolPayload::Content(blocks) => blocks
            .into_iter()
            .map(|block| serde_json::from_value(block).map_err(BridgeError::from))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(300);

    #[test]
    fn test_bare_string_is_date_normalization() {
        let call = ToolCall::from("16 February 2024");
        assert_eq!(call.tool(), ToolName::NormalizeDate);
        assert_eq!(call.arguments()["date_string"], "16 February 2024");
    }

    #[test]
    fn test_search_arguments_shape() {
        let call = ToolCall::Search {
            keyword: "revenue".to_string(),
            structured_json_path: PathBuf::from("data/budget.json"),
        };
        let args = call.arguments();
        assert_eq!(args["keyword"], "revenue");
        assert_eq!(args["structured_json_path"], "data/budget.json");
    }

    #[tokio::test]
    async fn test_read_response_skips_noise_and_other_ids() {
        let input = concat!(
            "starting server...\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":0,\"result\":{}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"ok\"}]}}\n",
        );
        let mut reader = BufReader::new(input.as_bytes());

        let resp = read_response(&mut reader, 1, METHOD_TOOLS_CALL, FAST).await.unwrap();
        assert!(resp.answers(1));
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "ok");
    }

    #[tokio::test]
    async fn test_read_response_reports_worker_exit() {
        let mut reader = BufReader::new("{\"jsonrpc\":\"2.0\",\"id\":0,\"result\":{}}\n".as_bytes());
        let err = read_response(&mut reader, 1, METHOD_TOOLS_CALL, FAST).await.unwrap_err();
        assert!(matches!(err, BridgeError::WorkerExited(_)));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_read_response_times_out() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);
        let err = read_response(&mut reader, 1, METHOD_TOOLS_CALL, FAST).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_extract_payload_variants() {
        let text = extract_payload(CallToolResult::text("2024-01-01")).unwrap();
        assert_eq!(text, ToolPayload::Text("2024-01-01".to_string()));

        let empty = extract_payload(CallToolResult::default()).unwrap();
        assert_eq!(empty, ToolPayload::Content(vec![]));

        let err = extract_payload(CallToolResult::error("corpus missing")).unwrap_err();
        assert!(matches!(err, BridgeError::ToolFailed(ref m) if m == "corpus missing"));
    }

    #[test]
    fn test_hits_from_payload() {
        let hits = hits_from_payload(ToolPayload::Text(
            r#"[{"page": 4, "text": "Corporate Income Tax"}]"#.to_string(),
        ))
        .unwrap();
        assert_eq!(hits, vec![PageHit { page: 4, text: "Corporate Income Tax".to_string() }]);

        let none = hits_from_payload(ToolPayload::Text("[]".to_string())).unwrap();
        assert!(none.is_empty());

        let records = hits_from_payload(ToolPayload::Content(vec![
            json!({"page": 1, "text": "a"}),
            json!({"page": 2, "text": "b"}),
        ]))
        .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[cfg(unix)]
    fn scripted_worker(script: &str) -> WorkerCommand {
        WorkerCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_against_scripted_worker() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":0,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"t","version":"0"}}}'
read notification
read call
echo 'log line that is not json'
echo '{"jsonrpc":"2.0","id":1,"result":{"content":[{"type":"text","text":"2024-02-16"}]}}'
"#;
        let bridge = ToolBridge::new(Duration::from_secs(3), FAST)
            .with_worker(ToolName::NormalizeDate, scripted_worker(script));

        let date = bridge.normalize_date("16 February 2024").await.unwrap();
        assert_eq!(date, "2024-02-16");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_worker_times_out() {
        let bridge = ToolBridge::new(FAST, FAST).with_worker(
            ToolName::Search,
            WorkerCommand {
                program: "sleep".to_string(),
                args: vec!["5".to_string()],
            },
        );

        let started = std::time::Instant::now();
        let err = bridge
            .search("revenue", PathBuf::from("budget.json"))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rpc_error_is_not_a_timeout() {
        let script = r#"
read init
echo '{"jsonrpc":"2.0","id":0,"result":{}}'
read notification
read call
echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"missing keyword"}}'
"#;
        let bridge = ToolBridge::new(Duration::from_secs(3), FAST)
            .with_worker(ToolName::Search, scripted_worker(script));

        let err = bridge
            .search("", PathBuf::from("budget.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let bridge = ToolBridge::new(FAST, FAST).with_worker(
            ToolName::NormalizeDate,
            WorkerCommand {
                program: "/nonexistent/budget-qa-worker".to_string(),
                args: vec![],
            },
        );
        let err = bridge.normalize_date("1 Jan 2024").await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
    }
}
