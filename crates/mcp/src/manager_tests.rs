// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client::McpChannel;
use mux_core::clock::FakeClock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;

struct FakeChannel {
    closed: AtomicBool,
}

#[async_trait]
impl McpChannel for FakeChannel {
    async fn request(&self, _method: &str, _params: Value) -> Result<Value, McpError> {
        Ok(Value::Null)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeConnector {
    connects: Mutex<HashMap<String, u32>>,
    channels: Mutex<HashMap<String, Vec<Arc<FakeChannel>>>>,
}

impl FakeConnector {
    fn connect_count(&self, name: &str) -> u32 {
        self.connects.lock().get(name).copied().unwrap_or(0)
    }

    fn latest_channel(&self, name: &str) -> Arc<FakeChannel> {
        self.channels.lock().get(name).and_then(|v| v.last().cloned()).unwrap()
    }

    fn channel_at(&self, name: &str, index: usize) -> Arc<FakeChannel> {
        self.channels.lock().get(name).and_then(|v| v.get(index).cloned()).unwrap()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<ConnectedServer, McpError> {
        *self.connects.lock().entry(config.name.clone()).or_insert(0) += 1;
        let channel = Arc::new(FakeChannel { closed: AtomicBool::new(false) });
        self.channels.lock().entry(config.name.clone()).or_default().push(channel.clone());
        let client = Arc::new(McpClient::new(&config.name, channel));
        Ok(ConnectedServer {
            client,
            tools: vec![
                McpToolInfo {
                    name: "search".into(),
                    description: None,
                    input_schema: json!({}),
                },
                McpToolInfo {
                    name: "write".into(),
                    description: None,
                    input_schema: json!({}),
                },
            ],
        })
    }
}

fn server(name: &str) -> McpServerConfig {
    McpServerConfig {
        name: name.into(),
        transport: McpTransportConfig::Stdio {
            command: format!("{name}-bin"),
            args: vec![],
            env: BTreeMap::new(),
        },
        enabled: true,
        tool_allowlist: None,
    }
}

fn ws() -> WorkspaceId {
    WorkspaceId::from_string("wks-mcp")
}

fn manager(connector: Arc<FakeConnector>) -> (McpServerManager<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (McpServerManager::with_clock(clock.clone(), connector), clock)
}

#[tokio::test]
async fn first_request_connects_and_namespaces_tools() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());

    let tools = manager
        .get_tools_for_workspace(&ws(), &[server("docs"), server("code")], &McpOverrides::default())
        .await
        .unwrap();

    assert_eq!(connector.connect_count("docs"), 1);
    assert_eq!(connector.connect_count("code"), 1);
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["docs_search", "docs_write", "code_search", "code_write"]);
}

#[tokio::test]
async fn lease_taken_before_first_request_still_builds_servers() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());

    // Production ordering: the stream manager leases before it asks for
    // tools. The first request must build, not defer against the
    // placeholder entry the lease created.
    manager.acquire_lease(&ws());
    let tools = manager
        .get_tools_for_workspace(&ws(), &[server("docs")], &McpOverrides::default())
        .await
        .unwrap();

    assert_eq!(connector.connect_count("docs"), 1);
    assert_eq!(
        tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        vec!["docs_search", "docs_write"]
    );
    assert!(!manager.has_pending_config(&ws()));
    // The lease survived the build.
    assert_eq!(manager.lease_count(&ws()), 1);
}

#[tokio::test]
async fn matching_signature_reuses_instances() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());
    let servers = [server("docs")];

    manager.get_tools_for_workspace(&ws(), &servers, &McpOverrides::default()).await.unwrap();
    manager.get_tools_for_workspace(&ws(), &servers, &McpOverrides::default()).await.unwrap();
    assert_eq!(connector.connect_count("docs"), 1);
}

#[tokio::test]
async fn closed_instance_restarts_alone_under_lease() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());
    let servers = [server("docs"), server("code")];

    manager.get_tools_for_workspace(&ws(), &servers, &McpOverrides::default()).await.unwrap();
    manager.acquire_lease(&ws());

    // docs dies; code stays healthy.
    connector.latest_channel("docs").shutdown().await;

    manager.get_tools_for_workspace(&ws(), &servers, &McpOverrides::default()).await.unwrap();
    assert_eq!(connector.connect_count("docs"), 2);
    assert_eq!(connector.connect_count("code"), 1);
    assert!(!connector.channel_at("code", 0).is_closed());
}

#[tokio::test]
async fn config_change_under_lease_is_deferred() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());

    manager
        .get_tools_for_workspace(&ws(), &[server("docs")], &McpOverrides::default())
        .await
        .unwrap();
    manager.acquire_lease(&ws());

    // Changed set while leased: serve the old instances untouched.
    let tools = manager
        .get_tools_for_workspace(&ws(), &[server("docs"), server("new")], &McpOverrides::default())
        .await
        .unwrap();
    assert_eq!(connector.connect_count("new"), 0);
    assert!(manager.has_pending_config(&ws()));
    assert!(tools.iter().all(|t| t.server == "docs"));

    // Released + a fresh unleased request: now the swap happens.
    manager.release_lease(&ws());
    manager
        .get_tools_for_workspace(&ws(), &[server("docs"), server("new")], &McpOverrides::default())
        .await
        .unwrap();
    assert_eq!(connector.connect_count("new"), 1);
    assert_eq!(connector.connect_count("docs"), 2);
    // The pre-swap docs instance was stopped.
    assert!(connector.channel_at("docs", 0).is_closed());
    assert!(!manager.has_pending_config(&ws()));
}

#[tokio::test]
async fn idle_sweep_closes_only_unleased_workspaces() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, clock) = manager(connector.clone());

    let idle_ws = WorkspaceId::from_string("wks-idle");
    let leased_ws = WorkspaceId::from_string("wks-busy");
    manager
        .get_tools_for_workspace(&idle_ws, &[server("docs")], &McpOverrides::default())
        .await
        .unwrap();
    manager
        .get_tools_for_workspace(&leased_ws, &[server("code")], &McpOverrides::default())
        .await
        .unwrap();
    manager.acquire_lease(&leased_ws);

    clock.advance(Duration::from_secs(11 * 60));
    manager.sweep_idle().await;

    assert!(connector.latest_channel("docs").is_closed());
    assert!(!connector.latest_channel("code").is_closed());
    assert_eq!(manager.lease_count(&leased_ws), 1);
}

#[tokio::test]
async fn recent_activity_survives_the_sweep() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, clock) = manager(connector.clone());
    manager
        .get_tools_for_workspace(&ws(), &[server("docs")], &McpOverrides::default())
        .await
        .unwrap();

    clock.advance(Duration::from_secs(5 * 60));
    manager.sweep_idle().await;
    assert!(!connector.latest_channel("docs").is_closed());
}

#[tokio::test]
async fn allowlist_filters_namespaced_tools() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());
    let mut cfg = server("docs");
    cfg.tool_allowlist = Some(vec!["search".into()]);

    let tools = manager
        .get_tools_for_workspace(&ws(), &[cfg], &McpOverrides::default())
        .await
        .unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["docs_search"]);
}

#[tokio::test]
async fn stop_workspace_closes_everything() {
    let connector = Arc::new(FakeConnector::default());
    let (manager, _) = manager(connector.clone());
    manager
        .get_tools_for_workspace(&ws(), &[server("docs")], &McpOverrides::default())
        .await
        .unwrap();
    manager.stop_workspace(&ws()).await;
    assert!(connector.latest_channel("docs").is_closed());
}

/// Serves scripted HTTP responses, one connection each.
async fn scripted_http(responses: Vec<(u16, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/rpc")
}

#[tokio::test]
async fn http_405_falls_back_to_sse_transport() {
    let url = scripted_http(vec![
        (405, "no".into()),
        (200, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.into()),
        (
            200,
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","inputSchema":{}}]}}"#
                .into(),
        ),
    ])
    .await;

    let config = McpServerConfig {
        name: "remote".into(),
        transport: McpTransportConfig::Http { url, headers: BTreeMap::new() },
        enabled: true,
        tool_allowlist: None,
    };
    let connected = DefaultConnector.connect(&config).await.unwrap();
    assert_eq!(connected.tools.len(), 1);
    assert_eq!(connected.tools[0].name, "ping");
}
