// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP JSON-RPC channel over TCP.
//!
//! MCP servers reachable over HTTP get one POST per request; the SSE twin
//! differs only in its Accept header and is selected by the manager's
//! status-code fallback. TLS endpoints are out of scope — remote servers are
//! reached through local proxies.

use crate::client::{McpChannel, McpError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a channel speaks plain HTTP or the SSE variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFlavor {
    Plain,
    Sse,
}

pub struct HttpChannel {
    name: String,
    addr: String,
    path: String,
    host_header: String,
    headers: BTreeMap<String, String>,
    flavor: HttpFlavor,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl HttpChannel {
    pub fn new(
        name: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        flavor: HttpFlavor,
    ) -> Result<Self, McpError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| McpError::Connect(format!("unsupported mcp url: {url}")))?;
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority.to_string(), format!("/{path}")),
            None => (rest.to_string(), "/".to_string()),
        };
        let addr = if authority.contains(':') {
            authority.clone()
        } else {
            format!("{authority}:80")
        };
        Ok(Self {
            name: name.to_string(),
            addr,
            path,
            host_header: authority,
            headers: headers.clone(),
            flavor,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    async fn post(&self, body: &str) -> Result<(u16, String), McpError> {
        let accept = match self.flavor {
            HttpFlavor::Plain => "application/json",
            HttpFlavor::Sse => "text/event-stream, application/json",
        };
        let mut request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nAccept: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.path,
            self.host_header,
            accept,
            body.len()
        );
        for (key, value) in &self.headers {
            request.push_str(&format!("{key}: {value}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(body);

        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| McpError::Connect(format!("tcp connect failed: {e}")))?;
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| McpError::Connect(format!("write failed: {e}")))?;
            read_response(&mut stream).await
        };
        tokio::time::timeout(HTTP_TIMEOUT, exchange)
            .await
            .map_err(|_| McpError::Timeout)?
    }
}

/// Parse status line, skip headers, return (status, body).
async fn read_response(stream: &mut TcpStream) -> Result<(u16, String), McpError> {
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .await
        .map_err(|e| McpError::Connect(format!("read failed: {e}")))?;
    let text = String::from_utf8_lossy(&raw);

    let mut lines = text.splitn(2, "\r\n\r\n");
    let head = lines.next().unwrap_or_default();
    let body = lines.next().unwrap_or_default().to_string();

    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| McpError::Protocol(format!("unparseable http response: {head:?}")))?;
    Ok((status, body))
}

#[async_trait]
impl McpChannel for HttpChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed(self.name.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let (status, body) = self.post(&body.to_string()).await?;
        if status >= 400 {
            return Err(McpError::HttpStatus { status });
        }
        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| McpError::Protocol(format!("bad json-rpc body: {e}")))?;
        if let Some(error) = value.get("error") {
            return Err(McpError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
