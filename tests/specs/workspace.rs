// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace lifecycle specs: dirty deletes block and leave MCP state alone.

use async_trait::async_trait;
use mux_core::workspace::WorkspaceId;
use mux_mcp::client::{ConnectedServer, McpChannel, McpClient, McpError, McpToolInfo};
use mux_mcp::config::{McpOverrides, McpServerConfig, McpTransportConfig};
use mux_mcp::manager::{Connector, McpServerManager};
use mux_runtime::base::RuntimeBase;
use mux_runtime::contract::{CreateParams, Runtime};
use mux_runtime::error::RuntimeError;
use mux_runtime::worktree::WorktreeRuntime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct OpenChannel {
    closed: AtomicBool,
}

#[async_trait]
impl McpChannel for OpenChannel {
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

struct OneChannelConnector {
    channel: Arc<OpenChannel>,
}

#[async_trait]
impl Connector for OneChannelConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<ConnectedServer, McpError> {
        Ok(ConnectedServer {
            client: Arc::new(McpClient::new(&config.name, self.channel.clone())),
            tools: vec![McpToolInfo {
                name: "search".into(),
                description: None,
                input_schema: serde_json::json!({}),
            }],
        })
    }
}

fn git_repo() -> TempDir {
    let repo = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        let out = std::process::Command::new("git")
            .args(args)
            .current_dir(repo.path())
            .env("GIT_AUTHOR_NAME", "mux")
            .env("GIT_AUTHOR_EMAIL", "mux@test")
            .env("GIT_COMMITTER_NAME", "mux")
            .env("GIT_COMMITTER_EMAIL", "mux@test")
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    };
    run(&["init", "-b", "main"]);
    std::fs::write(repo.path().join("README.md"), "hi\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "init"]);
    repo
}

/// Spec: deleting a dirty workspace without force fails, and the workspace's
/// MCP instances are not torn down by the failed attempt.
#[tokio::test]
async fn dirty_delete_without_force_fails_and_leaves_mcp_running() {
    let repo = git_repo();
    let trees = TempDir::new().unwrap();
    let runtime = WorktreeRuntime::new(RuntimeBase::new(), trees.path().to_path_buf());

    let path = runtime
        .create_workspace(CreateParams {
            project_path: repo.path().to_path_buf(),
            workspace_name: "dirty-ws".into(),
            branch: None,
        })
        .await
        .unwrap();
    std::fs::write(std::path::Path::new(&path).join("wip.rs"), "// half done").unwrap();

    // One live MCP instance for this workspace.
    let channel = Arc::new(OpenChannel { closed: AtomicBool::new(false) });
    let manager = McpServerManager::new(Arc::new(OneChannelConnector { channel: channel.clone() }));
    let ws = WorkspaceId::from_string("wks-dirty");
    let servers = [McpServerConfig {
        name: "docs".into(),
        transport: McpTransportConfig::Stdio {
            command: "docs-server".into(),
            args: vec![],
            env: BTreeMap::new(),
        },
        enabled: true,
        tool_allowlist: None,
    }];
    let tools = manager
        .get_tools_for_workspace(&ws, &servers, &McpOverrides::default())
        .await
        .unwrap();
    assert_eq!(tools.len(), 1);

    // Delete fails; the orchestration layer therefore never reaches the MCP
    // teardown step.
    let err = runtime.delete_workspace(repo.path(), "dirty-ws", false, None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::DeleteBlocked(_)));
    assert!(std::path::Path::new(&path).exists());

    assert!(!channel.is_closed());
    let tools = manager
        .get_tools_for_workspace(&ws, &servers, &McpOverrides::default())
        .await
        .unwrap();
    assert_eq!(tools.len(), 1, "instances survive the failed delete");

    // Forced delete succeeds, after which teardown is allowed to run.
    runtime.delete_workspace(repo.path(), "dirty-ws", true, None).await.unwrap();
    manager.stop_workspace(&ws).await;
    assert!(channel.is_closed());
}
