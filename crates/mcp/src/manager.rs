// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-scoped cache of spawned MCP clients.
//!
//! Instances are keyed by a signature over the resolved config set. Leases
//! protect healthy instances from restarts and from the idle sweeper; a
//! signature change under lease is deferred until the lease count falls to
//! zero and an unleased request arrives. Already-closed instances restart
//! even under lease — their siblings stay untouched.

use crate::client::{ConnectedServer, McpClient, McpError, McpToolInfo, StdioChannel};
use crate::config::{apply_overrides, config_signature, McpOverrides, McpServerConfig, McpTransportConfig};
use crate::http::{HttpChannel, HttpFlavor};
use async_trait::async_trait;
use indexmap::IndexMap;
use mux_core::clock::{Clock, SystemClock};
use mux_core::workspace::WorkspaceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sweep cadence for the idle task.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Idle age at which unleased instances are closed.
pub const IDLE_EVICTION: Duration = Duration::from_secs(10 * 60);

/// One tool, namespaced as `<server>_<tool>`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespacedTool {
    pub server: String,
    pub name: String,
    pub info: McpToolInfo,
}

/// Starts servers; injectable so tests stay process-free.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &McpServerConfig) -> Result<ConnectedServer, McpError>;
}

/// Spawns stdio servers and dials HTTP ones, with the SSE fallback on
/// status 400/404/405.
pub struct DefaultConnector;

impl DefaultConnector {
    async fn connect_once(&self, config: &McpServerConfig) -> Result<ConnectedServer, McpError> {
        let channel: Arc<dyn crate::client::McpChannel> = match &config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                Arc::new(StdioChannel::spawn(&config.name, command, args, env)?)
            }
            McpTransportConfig::Http { url, headers } => {
                Arc::new(HttpChannel::new(&config.name, url, headers, HttpFlavor::Plain)?)
            }
            McpTransportConfig::Sse { url, headers } => {
                Arc::new(HttpChannel::new(&config.name, url, headers, HttpFlavor::Sse)?)
            }
        };
        let client = Arc::new(McpClient::new(&config.name, channel));
        client.initialize().await?;
        let tools = client.list_tools().await?;
        Ok(ConnectedServer { client, tools })
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, config: &McpServerConfig) -> Result<ConnectedServer, McpError> {
        match self.connect_once(config).await {
            Err(McpError::HttpStatus { status: status @ (400 | 404 | 405) }) => {
                let Some(sse) = config.transport.as_sse() else {
                    return Err(McpError::HttpStatus { status });
                };
                tracing::info!(server = %config.name, status, "http mcp rejected; retrying over sse");
                let mut fallback = config.clone();
                fallback.transport = sse;
                self.connect_once(&fallback).await
            }
            other => other,
        }
    }
}

struct Instance {
    config: McpServerConfig,
    client: Arc<McpClient>,
    tools: Vec<McpToolInfo>,
}

struct WorkspaceEntry {
    signature: String,
    instances: IndexMap<String, Instance>,
    last_activity: Instant,
    leases: u32,
    /// Config set waiting for the lease count to reach zero.
    pending: Option<Vec<McpServerConfig>>,
}

/// The per-process MCP manager.
pub struct McpServerManager<C: Clock = SystemClock> {
    clock: C,
    connector: Arc<dyn Connector>,
    workspaces: Arc<Mutex<HashMap<WorkspaceId, WorkspaceEntry>>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl McpServerManager<SystemClock> {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_clock(SystemClock, connector)
    }
}

impl<C: Clock> McpServerManager<C> {
    pub fn with_clock(clock: C, connector: Arc<dyn Connector>) -> Self {
        Self {
            clock,
            connector,
            workspaces: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the 60s idle sweeper task. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let manager = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await; // immediate first tick
            loop {
                tick.tick().await;
                let Some(manager) = manager.upgrade() else { return };
                manager.sweep_idle().await;
            }
        }));
    }

    /// Resolve tools for a workspace, reusing cached healthy instances.
    pub async fn get_tools_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
        project_servers: &[McpServerConfig],
        overrides: &McpOverrides,
    ) -> Result<Vec<NamespacedTool>, McpError> {
        let resolved = apply_overrides(project_servers, overrides);
        let signature = config_signature(&resolved);

        enum Plan {
            Reuse,
            RestartClosed(Vec<McpServerConfig>),
            Defer,
            Rebuild(Vec<Arc<McpClient>>),
        }

        let plan = {
            let mut workspaces = self.workspaces.lock();
            match workspaces.get_mut(workspace_id) {
                Some(entry) if entry.signature == signature => {
                    let closed: Vec<McpServerConfig> = entry
                        .instances
                        .values()
                        .filter(|i| i.client.is_closed())
                        .map(|i| i.config.clone())
                        .collect();
                    entry.last_activity = self.clock.now();
                    if closed.is_empty() {
                        Plan::Reuse
                    } else {
                        // Restart only the dead ones, leased or not.
                        Plan::RestartClosed(closed)
                    }
                }
                // Defer applies only to an already-built entry: a lease taken
                // before the first request leaves a placeholder (empty
                // signature, no instances) that must still build.
                Some(entry) if entry.leases > 0 && !entry.signature.is_empty() => {
                    // Config changed under lease: defer until fully released.
                    entry.pending = Some(resolved.clone());
                    entry.last_activity = self.clock.now();
                    Plan::Defer
                }
                Some(entry) => {
                    let old: Vec<Arc<McpClient>> =
                        entry.instances.values().map(|i| i.client.clone()).collect();
                    Plan::Rebuild(old)
                }
                None => Plan::Rebuild(Vec::new()),
            }
        };

        match plan {
            Plan::Reuse | Plan::Defer => Ok(self.aggregated_tools(workspace_id)),
            Plan::RestartClosed(closed) => {
                for config in closed {
                    let connected = self.connector.connect(&config).await?;
                    let mut workspaces = self.workspaces.lock();
                    if let Some(entry) = workspaces.get_mut(workspace_id) {
                        entry.instances.insert(
                            config.name.clone(),
                            Instance {
                                config: config.clone(),
                                client: connected.client,
                                tools: connected.tools,
                            },
                        );
                    }
                }
                Ok(self.aggregated_tools(workspace_id))
            }
            Plan::Rebuild(old) => {
                for client in old {
                    client.stop().await;
                }
                let mut instances = IndexMap::new();
                for config in &resolved {
                    let connected = self.connector.connect(config).await?;
                    instances.insert(
                        config.name.clone(),
                        Instance {
                            config: config.clone(),
                            client: connected.client,
                            tools: connected.tools,
                        },
                    );
                }
                let mut workspaces = self.workspaces.lock();
                let leases = workspaces.get(workspace_id).map(|e| e.leases).unwrap_or(0);
                workspaces.insert(
                    workspace_id.clone(),
                    WorkspaceEntry {
                        signature,
                        instances,
                        last_activity: self.clock.now(),
                        leases,
                        pending: None,
                    },
                );
                drop(workspaces);
                Ok(self.aggregated_tools(workspace_id))
            }
        }
    }

    fn aggregated_tools(&self, workspace_id: &WorkspaceId) -> Vec<NamespacedTool> {
        let workspaces = self.workspaces.lock();
        let Some(entry) = workspaces.get(workspace_id) else { return Vec::new() };
        let mut out = Vec::new();
        for instance in entry.instances.values() {
            for tool in &instance.tools {
                if let Some(allow) = &instance.config.tool_allowlist {
                    if !allow.contains(&tool.name) {
                        continue;
                    }
                }
                out.push(NamespacedTool {
                    server: instance.config.name.clone(),
                    name: format!("{}_{}", instance.config.name, tool.name),
                    info: tool.clone(),
                });
            }
        }
        out
    }

    /// Reference-counted: while leased, healthy instances are never closed.
    pub fn acquire_lease(&self, workspace_id: &WorkspaceId) {
        let mut workspaces = self.workspaces.lock();
        if let Some(entry) = workspaces.get_mut(workspace_id) {
            entry.leases += 1;
            entry.last_activity = self.clock.now();
        } else {
            workspaces.insert(
                workspace_id.clone(),
                WorkspaceEntry {
                    signature: String::new(),
                    instances: IndexMap::new(),
                    last_activity: self.clock.now(),
                    leases: 1,
                    pending: None,
                },
            );
        }
    }

    pub fn release_lease(&self, workspace_id: &WorkspaceId) {
        let mut workspaces = self.workspaces.lock();
        if let Some(entry) = workspaces.get_mut(workspace_id) {
            entry.leases = entry.leases.saturating_sub(1);
            entry.last_activity = self.clock.now();
        }
    }

    pub fn lease_count(&self, workspace_id: &WorkspaceId) -> u32 {
        self.workspaces.lock().get(workspace_id).map(|e| e.leases).unwrap_or(0)
    }

    /// Whether a deferred config swap is parked for this workspace.
    pub fn has_pending_config(&self, workspace_id: &WorkspaceId) -> bool {
        self.workspaces.lock().get(workspace_id).is_some_and(|e| e.pending.is_some())
    }

    /// Close instances idle past the eviction age, iff unleased.
    pub async fn sweep_idle(&self) {
        let victims: Vec<(WorkspaceId, Vec<Arc<McpClient>>)> = {
            let mut workspaces = self.workspaces.lock();
            let now = self.clock.now();
            let doomed: Vec<WorkspaceId> = workspaces
                .iter()
                .filter(|(_, e)| {
                    e.leases == 0 && now.duration_since(e.last_activity) > IDLE_EVICTION
                })
                .map(|(id, _)| id.clone())
                .collect();
            doomed
                .into_iter()
                .filter_map(|id| {
                    workspaces.remove(&id).map(|entry| {
                        (id, entry.instances.into_values().map(|i| i.client).collect())
                    })
                })
                .collect()
        };
        for (workspace_id, clients) in victims {
            tracing::debug!(workspace = %workspace_id, "evicting idle mcp instances");
            for client in clients {
                client.stop().await;
            }
        }
    }

    /// Stop everything for a workspace (workspace deletion path).
    pub async fn stop_workspace(&self, workspace_id: &WorkspaceId) {
        let clients: Vec<Arc<McpClient>> = {
            let mut workspaces = self.workspaces.lock();
            match workspaces.remove(workspace_id) {
                Some(entry) => entry.instances.into_values().map(|i| i.client).collect(),
                None => Vec::new(),
            }
        };
        for client in clients {
            client.stop().await;
        }
    }
}

impl<C: Clock> Drop for McpServerManager<C> {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
