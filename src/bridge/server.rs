//! Worker side of the bridge: serve one tool over newline-delimited JSON-RPC.
//!
//! Started by `budget-qa --serve-tool <tool>`. Requests are read from stdin
//! and answered on stdout until stdin closes. Logging goes to stderr.

use crate::bridge::protocol::*;
use crate::error::BridgeError;
use crate::tools::{self, ToolName};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Serves a single tool to one bridge client.
pub struct ToolServer {
    tool: ToolName,
    initialized: bool,
}

impl ToolServer {
    pub fn new(tool: ToolName) -> Self {
        Self {
            tool,
            initialized: false,
        }
    }

    /// Serve on the process's stdin/stdout.
    pub async fn serve_stdio(&mut self) -> Result<(), BridgeError> {
        let reader = BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();
        self.run(reader, &mut writer).await
    }

    /// Process messages until the reader reaches EOF.
    pub async fn run<R, W>(&mut self, reader: R, writer: &mut W) -> Result<(), BridgeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Tool worker for {} starting", self.tool);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(line) {
                let mut json = serde_json::to_string(&response)?;
                json.push('\n');
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("Input closed, tool worker for {} exiting", self.tool);
        Ok(())
    }

    /// Handle one raw line. Notifications produce no response.
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse JSON: {}", e);
                return Some(JsonRpcResponse::failure(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("parse error: {}", e),
                ));
            }
        };

        if raw.get("id").is_none() {
            match serde_json::from_value::<JsonRpcNotification>(raw) {
                Ok(notification) => self.handle_notification(&notification),
                Err(e) => debug!("Ignoring malformed notification: {}", e),
            }
            return None;
        }

        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => Some(self.handle_request(&request)),
            Err(e) => Some(JsonRpcResponse::failure(
                None,
                error_codes::INVALID_REQUEST,
                format!("invalid request: {}", e),
            )),
        }
    }

    pub fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!("Handling {} (id {:?})", request.method, id);

        match request.method.as_str() {
            METHOD_INITIALIZE => self.handle_initialize(id),
            METHOD_TOOLS_LIST => self.handle_list_tools(id),
            METHOD_TOOLS_CALL => self.handle_call_tool(id, request.params.as_ref()),
            method => JsonRpcResponse::failure(
                Some(id),
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {}", method),
            ),
        }
    }

    fn handle_notification(&mut self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            METHOD_INITIALIZED => debug!("Client confirmed initialization"),
            other => debug!("Ignoring notification {}", other),
        }
    }

    fn handle_initialize(&mut self, id: RpcId) -> JsonRpcResponse {
        self.initialized = true;
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({ "tools": { "listChanged": false } }),
            server_info: ServerInfo {
                name: format!("{}-server", self.tool.cli_value()),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        to_response(id, &result)
    }

    fn handle_list_tools(&self, id: RpcId) -> JsonRpcResponse {
        let result = ListToolsResult {
            tools: vec![ToolInfo {
                name: self.tool.wire_name().to_string(),
                description: self.tool.description().to_string(),
                input_schema: self.tool.input_schema(),
            }],
        };
        to_response(id, &result)
    }

    fn handle_call_tool(&self, id: RpcId, params: Option<&Value>) -> JsonRpcResponse {
        if !self.initialized {
            warn!("tools/call received before initialize");
        }

        let Some(params) = params else {
            return invalid_params(id, "missing params");
        };
        let call: CallToolParams = match serde_json::from_value(params.clone()) {
            Ok(call) => call,
            Err(e) => return invalid_params(id, &e.to_string()),
        };
        if ToolName::from_wire_name(&call.name) != Some(self.tool) {
            return invalid_params(id, &format!("unknown tool: {}", call.name));
        }

        match self.execute(&call.arguments) {
            Ok(result) => to_response(id, &result),
            Err(message) => invalid_params(id, &message),
        }
    }

    /// Run the tool. `Err` means the arguments were unusable; failures of
    /// the tool itself are reported in-band with `isError`.
    fn execute(&self, arguments: &Value) -> Result<CallToolResult, String> {
        match self.tool {
            ToolName::Search => {
                let keyword = string_arg(arguments, "keyword")?;
                let path = string_arg(arguments, "structured_json_path")?;
                match tools::search_budget_text(keyword, Path::new(path)) {
                    Ok(hits) => {
                        info!("search_budget_text({:?}) -> {} hit(s)", keyword, hits.len());
                        let text = serde_json::to_string(&hits).map_err(|e| e.to_string())?;
                        Ok(CallToolResult::text(text))
                    }
                    Err(e) => {
                        warn!("search_budget_text failed: {}", e);
                        Ok(CallToolResult::error(e.to_string()))
                    }
                }
            }
            ToolName::NormalizeDate => {
                let date_string = arguments
                    .get("date_string")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(CallToolResult::text(tools::normalize_date(date_string)))
            }
        }
    }
}

fn string_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, String> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument: {}", name))
}

fn invalid_params(id: RpcId, message: &str) -> JsonRpcResponse {
    JsonRpcResponse::failure(Some(id), error_codes::INVALID_PARAMS, message)
}

fn to_response<T: serde::Serialize>(id: RpcId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::failure(Some(id), error_codes::INTERNAL_ERROR, e.to_string()),
    }
}
