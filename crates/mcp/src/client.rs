// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP client: JSON-RPC 2.0 over a pluggable channel.
//!
//! The stdio channel spawns the server process and wires stdin/stdout to a
//! writer/reader task pair; callers only see `request`. Server-initiated
//! requests and notifications are logged and dropped — the core consumes
//! tools, it does not serve them.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

/// Per-request budget before a server is considered wedged.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum McpError {
    #[error("mcp spawn failed: {0}")]
    Spawn(String),
    #[error("mcp_server_closed: {0}")]
    Closed(String),
    #[error("mcp protocol error: {0}")]
    Protocol(String),
    #[error("mcp rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("mcp http connect failed with status {status}")]
    HttpStatus { status: u16 },
    #[error("mcp connect failed: {0}")]
    Connect(String),
    #[error("mcp request timed out")]
    Timeout,
}

/// One tool as reported by `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Raw JSON-RPC duplex to one server.
#[async_trait]
pub trait McpChannel: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;
    fn is_closed(&self) -> bool;
    async fn shutdown(&self);
}

/// High-level client over a channel.
pub struct McpClient {
    name: String,
    channel: Arc<dyn McpChannel>,
}

/// A started server with its tool catalog, ready for the manager cache.
pub struct ConnectedServer {
    pub client: Arc<McpClient>,
    pub tools: Vec<McpToolInfo>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, channel: Arc<dyn McpChannel>) -> Self {
        Self { name: name.into(), channel }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn initialize(&self) -> Result<(), McpError> {
        self.channel
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "mux", "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {},
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let result = self.channel.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list result missing tools".into()))?;
        serde_json::from_value(tools).map_err(|e| McpError::Protocol(e.to_string()))
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed(self.name.clone()));
        }
        self.channel
            .request("tools/call", json!({"name": tool, "arguments": arguments}))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub async fn stop(&self) {
        self.channel.shutdown().await;
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

/// JSON-RPC over a spawned process's stdio.
pub struct StdioChannel {
    name: String,
    writer: mpsc::UnboundedSender<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    child: tokio::sync::Mutex<Option<tokio::process::Child>>,
}

impl StdioChannel {
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env.iter())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| McpError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("mcp child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("mcp child stdout not piped".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let (writer, mut writer_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let server_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let value: Value = match serde_json::from_str(&line) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::debug!(server = %server_name, error = %e, "mcp non-json line");
                        continue;
                    }
                };
                dispatch_message(&reader_pending, value, &server_name);
            }
            // EOF: the server is gone; fail anything still waiting.
            reader_closed.store(true, Ordering::SeqCst);
            let mut pending = reader_pending.lock();
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(McpError::Closed(server_name.clone())));
            }
        });

        Ok(Self {
            name: name.to_string(),
            writer,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            child: tokio::sync::Mutex::new(Some(child)),
        })
    }
}

/// Route one incoming message: responses resolve pending requests;
/// server-initiated traffic is logged and dropped.
fn dispatch_message(pending: &Pending, value: Value, server_name: &str) {
    let id = value.get("id").and_then(Value::as_u64);
    let is_response = value.get("result").is_some() || value.get("error").is_some();
    match (id, is_response) {
        (Some(id), true) => {
            let Some(tx) = pending.lock().remove(&id) else {
                tracing::debug!(server = %server_name, id, "mcp response for unknown id");
                return;
            };
            let outcome = if let Some(error) = value.get("error") {
                Err(McpError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                })
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = tx.send(outcome);
        }
        _ => {
            let method = value.get("method").and_then(Value::as_str).unwrap_or("?");
            tracing::debug!(server = %server_name, method, "ignoring server-initiated mcp message");
        }
    }
}

#[async_trait]
impl McpChannel for StdioChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed(self.name.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        if self.writer.send(line.to_string()).is_err() {
            self.pending.lock().remove(&id);
            return Err(McpError::Closed(self.name.clone()));
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Closed(self.name.clone())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(McpError::Timeout)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
