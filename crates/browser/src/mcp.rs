//! MCP client for the browser-automation server.
//!
//! The server is a child process speaking newline-delimited JSON-RPC over
//! stdio, launched against the browser's debug port. Clients are registered
//! in a process-wide registry keyed by that port, so distinct agent
//! instances (distinct ports) never collide on the same logical client.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use webpilot_core::config::AutomationConfig;
use webpilot_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

/// One typed piece of a tool response.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text { text: String },
    Resource { uri: String },
}

/// Normalized `tools/call` response: an ordered list of content parts.
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    pub content: Vec<ContentPart>,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }
}

/// The automation-protocol boundary the action executor talks to.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    async fn call_tool(&self, operation: &str, args: Value) -> Result<ToolResponse>;
    fn status(&self) -> ClientStatus;
}

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

pub struct McpClient {
    port: u16,
    stdin: Arc<Mutex<ChildStdin>>,
    next_id: AtomicU64,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    _child: Arc<Mutex<Child>>,
}

impl McpClient {
    /// Spawn the automation server for the given browser port and perform
    /// the MCP initialization handshake.
    pub async fn start(config: &AutomationConfig, port: u16) -> Result<Self> {
        let args: Vec<String> = config
            .server_args
            .iter()
            .map(|a| a.replace("{port}", &port.to_string()))
            .collect();

        let mut child = Command::new(&config.server_command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Protocol(format!(
                    "mcp[{}]: failed to spawn '{}': {}",
                    port, config.server_command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol(format!("mcp[{}]: no stdin", port)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Protocol(format!("mcp[{}]: no stdout", port)))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::reader_task(
            stdout,
            pending.clone(),
            alive.clone(),
            port,
        ));

        let client = Self {
            port,
            stdin: Arc::new(Mutex::new(stdin)),
            next_id: AtomicU64::new(1),
            pending,
            alive,
            _child: Arc::new(Mutex::new(child)),
        };

        client.initialize().await?;
        info!(port, "Automation client connected");
        Ok(client)
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        let line = serde_json::to_string(&request)?;
        debug!(port = self.port, id, method, "mcp → request");

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Protocol(format!("mcp[{}]: write error: {}", self.port, e)))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| Error::Protocol(format!("mcp[{}]: write error: {}", self.port, e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| Error::Protocol(format!("mcp[{}]: flush error: {}", self.port, e)))?;
        }

        rx.await
            .map_err(|_| Error::Protocol(format!("mcp[{}]: server closed", self.port)))?
            .map_err(|e| Error::Protocol(format!("mcp[{}]: {}", self.port, e)))
    }

    /// MCP initialize + initialized notification.
    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "webpilot", "version": env!("CARGO_PKG_VERSION")}
        });
        self.call("initialize", Some(params)).await?;

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        let line = serde_json::to_string(&notification).unwrap_or_default();
        let mut stdin = self.stdin.lock().await;
        let _ = stdin.write_all(line.as_bytes()).await;
        let _ = stdin.write_all(b"\n").await;
        let _ = stdin.flush().await;
        Ok(())
    }

    async fn reader_task(stdout: ChildStdout, pending: PendingMap, alive: Arc<AtomicBool>, port: u16) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    match serde_json::from_str::<Value>(&line) {
                        Ok(response) => {
                            if let Some(id) = response.get("id").and_then(|v| v.as_u64()) {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let payload = if let Some(err) = response.get("error") {
                                        Err(format!(
                                            "JSON-RPC error {}: {}",
                                            err.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                                            err.get("message")
                                                .and_then(|m| m.as_str())
                                                .unwrap_or("unknown")
                                        ))
                                    } else {
                                        Ok(response
                                            .get("result")
                                            .cloned()
                                            .unwrap_or(Value::Null))
                                    };
                                    let _ = tx.send(payload);
                                }
                            }
                            // Notifications (no id) are silently ignored.
                        }
                        Err(e) => {
                            warn!(port, "mcp: failed to parse response: {}", e);
                        }
                    }
                }
                Ok(Some(_)) => {} // blank line
                Ok(None) => {
                    error!(port, "mcp: stdout closed");
                    alive.store(false, Ordering::SeqCst);
                    let mut map = pending.lock().await;
                    for (_, tx) in map.drain() {
                        let _ = tx.send(Err("automation server stdout closed".to_string()));
                    }
                    break;
                }
                Err(e) => {
                    error!(port, "mcp: read error: {}", e);
                    alive.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl AutomationClient for McpClient {
    async fn call_tool(&self, operation: &str, args: Value) -> Result<ToolResponse> {
        let params = serde_json::json!({"name": operation, "arguments": args});
        let result = self.call("tools/call", Some(params)).await?;

        if let Some(true) = result.get("isError").and_then(|v| v.as_bool()) {
            let message = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("automation server returned an error");
            return Err(Error::Protocol(message.to_string()));
        }

        Ok(parse_tool_response(&result))
    }

    fn status(&self) -> ClientStatus {
        if self.alive.load(Ordering::SeqCst) {
            ClientStatus::Connected
        } else {
            ClientStatus::Disconnected
        }
    }
}

/// Parse the `content` array of a tools/call result into typed parts.
/// Unknown part types are skipped.
fn parse_tool_response(result: &Value) -> ToolResponse {
    let mut parts = Vec::new();
    if let Some(arr) = result.get("content").and_then(|c| c.as_array()) {
        for item in arr {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        parts.push(ContentPart::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("resource") => {
                    if let Some(uri) = item
                        .get("resource")
                        .and_then(|r| r.get("uri"))
                        .and_then(|u| u.as_str())
                    {
                        parts.push(ContentPart::Resource {
                            uri: uri.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    ToolResponse { content: parts }
}

// ─── Per-port client registry ────────────────────────────────────────────────

static REGISTRY: Lazy<Mutex<HashMap<u16, Arc<McpClient>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get or create the automation client for a browser port. Re-entrant calls
/// for the same port return the existing client while it is still connected.
pub async fn client_for_port(config: &AutomationConfig, port: u16) -> Result<Arc<McpClient>> {
    let mut registry = REGISTRY.lock().await;

    if let Some(existing) = registry.get(&port) {
        if existing.status() == ClientStatus::Connected {
            return Ok(existing.clone());
        }
        registry.remove(&port);
    }

    let client = Arc::new(McpClient::start(config, port).await?);
    registry.insert(port, client.clone());
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_response_parts() {
        let result = json!({
            "content": [
                {"type": "text", "text": "Clicked."},
                {"type": "resource", "resource": {"uri": "screenshot://1"}},
                {"type": "audio", "data": "ignored"}
            ]
        });
        let response = parse_tool_response(&result);
        assert_eq!(response.content.len(), 2);
        match &response.content[0] {
            ContentPart::Text { text } => assert_eq!(text, "Clicked."),
            _ => panic!("expected text part"),
        }
        match &response.content[1] {
            ContentPart::Resource { uri } => assert_eq!(uri, "screenshot://1"),
            _ => panic!("expected resource part"),
        }
    }

    #[test]
    fn test_parse_tool_response_empty() {
        let response = parse_tool_response(&json!({}));
        assert!(response.content.is_empty());
    }
}
