// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-workspace stream driver.
//!
//! At most one active stream per workspace. The driver brackets the MCP
//! lease around provider consumption, snapshots the partial message after
//! every event, and routes completion either through the compaction engine
//! or the normal append path. Abort stops provider consumption but flushes
//! whatever the channel already buffered.

use crate::compact::{derive_context_usage, CompactionEngine, StreamEndInfo};
use crate::history::{HistoryError, HistoryLog};
use crate::provider::{Provider, ProviderEvent, StreamRequest, ToolDescriptor};
use crate::tokens::approx_token_count;
use async_trait::async_trait;
use mux_core::bus::EventBus;
use mux_core::clock::{Clock, SystemClock};
use mux_core::event::{AbortReason, ErrorType, MuxEvent};
use mux_core::id::MessageId;
use mux_core::message::{Message, Metadata, Part, Role, ToolState};
use mux_core::workspace::WorkspaceId;
use mux_mcp::config::{McpOverrides, McpServerConfig};
use mux_mcp::manager::McpServerManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("workspace already has an active stream")]
    AlreadyStreaming,
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed(Message),
    /// Routed through the compaction engine; history holds the boundary.
    Compacted,
    Aborted(AbortReason),
    Errored { error: String, error_type: ErrorType },
}

/// Tool discovery + lease bracket, injectable for tests.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn tools_for(&self, workspace_id: &WorkspaceId) -> Vec<ToolDescriptor>;
    fn acquire_lease(&self, workspace_id: &WorkspaceId);
    fn release_lease(&self, workspace_id: &WorkspaceId);
}

/// Catalog for workspaces without MCP servers.
pub struct NoTools;

#[async_trait]
impl ToolCatalog for NoTools {
    async fn tools_for(&self, _workspace_id: &WorkspaceId) -> Vec<ToolDescriptor> {
        Vec::new()
    }
    fn acquire_lease(&self, _workspace_id: &WorkspaceId) {}
    fn release_lease(&self, _workspace_id: &WorkspaceId) {}
}

/// The production catalog: MCP manager plus this workspace's server set.
pub struct WorkspaceTools {
    pub manager: Arc<McpServerManager>,
    pub servers: Vec<McpServerConfig>,
    pub overrides: McpOverrides,
}

#[async_trait]
impl ToolCatalog for WorkspaceTools {
    async fn tools_for(&self, workspace_id: &WorkspaceId) -> Vec<ToolDescriptor> {
        match self
            .manager
            .get_tools_for_workspace(workspace_id, &self.servers, &self.overrides)
            .await
        {
            Ok(tools) => tools
                .into_iter()
                .map(|t| ToolDescriptor {
                    name: t.name,
                    description: t.info.description,
                    input_schema: t.info.input_schema,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(workspace = %workspace_id, error = %e, "mcp tools unavailable");
                Vec::new()
            }
        }
    }

    fn acquire_lease(&self, workspace_id: &WorkspaceId) {
        self.manager.acquire_lease(workspace_id);
    }

    fn release_lease(&self, workspace_id: &WorkspaceId) {
        self.manager.release_lease(workspace_id);
    }
}

struct ActiveStream {
    cancel: CancellationToken,
    reason: Arc<Mutex<Option<AbortReason>>>,
}

pub struct StreamManager<C: Clock = SystemClock> {
    clock: C,
    bus: EventBus,
    history: Arc<HistoryLog>,
    provider: Arc<dyn Provider>,
    catalog: Arc<dyn ToolCatalog>,
    compaction: Arc<CompactionEngine<C>>,
    active: Mutex<HashMap<WorkspaceId, ActiveStream>>,
}

impl<C: Clock> StreamManager<C> {
    pub fn new(
        clock: C,
        bus: EventBus,
        history: Arc<HistoryLog>,
        provider: Arc<dyn Provider>,
        catalog: Arc<dyn ToolCatalog>,
        compaction: Arc<CompactionEngine<C>>,
    ) -> Self {
        Self {
            clock,
            bus,
            history,
            provider,
            catalog,
            compaction,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_streaming(&self, workspace_id: &WorkspaceId) -> bool {
        self.active.lock().contains_key(workspace_id)
    }

    /// Abort the workspace's stream, if any, with the given reason.
    pub fn stop(&self, workspace_id: &WorkspaceId, reason: AbortReason) {
        let active = self.active.lock();
        if let Some(stream) = active.get(workspace_id) {
            *stream.reason.lock() = Some(reason);
            stream.cancel.cancel();
        }
    }

    /// Drive one stream to its end. The history already holds the user turn.
    pub async fn run(
        &self,
        workspace_id: &WorkspaceId,
        model: &str,
        system: &str,
    ) -> Result<StreamOutcome, StreamError> {
        let cancel = CancellationToken::new();
        let reason: Arc<Mutex<Option<AbortReason>>> = Arc::new(Mutex::new(None));
        {
            let mut active = self.active.lock();
            if active.contains_key(workspace_id) {
                return Err(StreamError::AlreadyStreaming);
            }
            active.insert(
                *workspace_id,
                ActiveStream { cancel: cancel.clone(), reason: reason.clone() },
            );
        }
        self.catalog.acquire_lease(workspace_id);

        let outcome = self.drive(workspace_id, model, system, &cancel, &reason).await;

        self.catalog.release_lease(workspace_id);
        self.active.lock().remove(workspace_id);
        outcome
    }

    async fn drive(
        &self,
        workspace_id: &WorkspaceId,
        model: &str,
        system: &str,
        cancel: &CancellationToken,
        reason: &Arc<Mutex<Option<AbortReason>>>,
    ) -> Result<StreamOutcome, StreamError> {
        let tools = self.catalog.tools_for(workspace_id).await;
        let messages = self.history.read_history(workspace_id)?;
        let message_id = MessageId::new();
        let history_sequence = self.history.next_sequence(workspace_id)?;

        self.bus.emit(MuxEvent::StreamStart {
            workspace_id: *workspace_id,
            message_id,
            model: model.to_string(),
            history_sequence,
        });

        let mut rx = self.provider.open_stream(StreamRequest {
            workspace_id: *workspace_id,
            model: model.to_string(),
            system: system.to_string(),
            messages,
            tools,
        });

        let started = self.clock.now();
        let system_tokens = approx_token_count(system);
        let mut parts: Vec<Part> = Vec::new();

        loop {
            let event = tokio::select! {
                biased;
                event = rx.recv() => event,
                _ = cancel.cancelled() => {
                    // Flush whatever the provider already buffered.
                    while let Ok(event) = rx.try_recv() {
                        if !matches!(event, ProviderEvent::Finish { .. } | ProviderEvent::Error { .. }) {
                            self.apply_delta(workspace_id, message_id, &mut parts, event);
                        }
                    }
                    let reason = reason.lock().unwrap_or(AbortReason::UserCancelled);
                    self.bus.emit(MuxEvent::StreamAbort {
                        workspace_id: *workspace_id,
                        message_id,
                        reason,
                    });
                    return Ok(StreamOutcome::Aborted(reason));
                }
            };

            let Some(event) = event else {
                // Provider hung up without a terminal event.
                let error = "provider stream ended unexpectedly".to_string();
                self.bus.emit(MuxEvent::Error {
                    workspace_id: *workspace_id,
                    message_id,
                    error: error.clone(),
                    error_type: ErrorType::Unknown,
                });
                return Ok(StreamOutcome::Errored { error, error_type: ErrorType::Unknown });
            };

            match event {
                ProviderEvent::Finish { usage, context_usage } => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let end = StreamEndInfo {
                        message_id,
                        parts: parts.clone(),
                        model: Some(model.to_string()),
                        usage: Some(usage),
                        duration_ms: Some(duration_ms),
                        context_usage,
                        system_message_tokens: system_tokens,
                        provider_metadata: None,
                        context_provider_metadata: None,
                    };
                    if self.compaction.handle_completion(workspace_id, &end) {
                        return Ok(StreamOutcome::Compacted);
                    }

                    let metadata = Metadata {
                        timestamp: Some(self.clock.epoch_ms()),
                        model: Some(model.to_string()),
                        usage: Some(usage),
                        duration_ms: Some(duration_ms),
                        context_usage: derive_context_usage(
                            context_usage,
                            Some(&usage),
                            system_tokens,
                        ),
                        ..Default::default()
                    };
                    let message = Message {
                        id: message_id,
                        role: Role::Assistant,
                        parts: std::mem::take(&mut parts),
                        metadata,
                    };
                    let message = self.history.append_to_history(workspace_id, message)?;
                    self.history.delete_partial(workspace_id)?;
                    self.bus.emit(MuxEvent::StreamEnd {
                        workspace_id: *workspace_id,
                        message_id,
                        parts: message.parts.clone(),
                        metadata: message.metadata.clone(),
                    });
                    return Ok(StreamOutcome::Completed(message));
                }
                ProviderEvent::Error { message, kind } => {
                    self.bus.emit(MuxEvent::Error {
                        workspace_id: *workspace_id,
                        message_id,
                        error: message.clone(),
                        error_type: kind,
                    });
                    return Ok(StreamOutcome::Errored { error: message, error_type: kind });
                }
                delta => {
                    self.apply_delta(workspace_id, message_id, &mut parts, delta);
                    let snapshot = Message {
                        id: message_id,
                        role: Role::Assistant,
                        parts: parts.clone(),
                        metadata: Metadata {
                            timestamp: Some(self.clock.epoch_ms()),
                            model: Some(model.to_string()),
                            ..Default::default()
                        },
                    };
                    self.history.write_partial(workspace_id, &snapshot)?;
                }
            }
        }
    }

    /// Fold a non-terminal provider event into the parts and emit its
    /// frontend event.
    fn apply_delta(
        &self,
        workspace_id: &WorkspaceId,
        message_id: MessageId,
        parts: &mut Vec<Part>,
        event: ProviderEvent,
    ) {
        let timestamp = self.clock.epoch_ms();
        match event {
            ProviderEvent::TextDelta { delta } => {
                let tokens = approx_token_count(&delta);
                match parts.last_mut() {
                    Some(Part::Text { text }) => text.push_str(&delta),
                    _ => parts.push(Part::text(delta.clone())),
                }
                self.bus.emit(MuxEvent::StreamDelta {
                    workspace_id: *workspace_id,
                    message_id,
                    delta,
                    tokens,
                    timestamp,
                });
            }
            ProviderEvent::ReasoningDelta { delta } => {
                let tokens = approx_token_count(&delta);
                match parts.last_mut() {
                    Some(Part::Reasoning { text }) => text.push_str(&delta),
                    _ => parts.push(Part::Reasoning { text: delta.clone() }),
                }
                self.bus.emit(MuxEvent::ReasoningDelta {
                    workspace_id: *workspace_id,
                    message_id,
                    delta,
                    tokens,
                    timestamp,
                });
            }
            ProviderEvent::ToolCallStart { id, name, args } => {
                let tokens = approx_token_count(&args.to_string());
                parts.push(Part::ToolCall {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    input: args.clone(),
                    state: ToolState::InputAvailable,
                    output: None,
                    error: None,
                });
                self.bus.emit(MuxEvent::ToolCallStart {
                    workspace_id: *workspace_id,
                    message_id,
                    tool_call_id: id,
                    tool_name: name,
                    args,
                    tokens,
                    timestamp,
                });
            }
            ProviderEvent::ToolCallEnd { id, result } => {
                let mut tool_name = String::new();
                for part in parts.iter_mut() {
                    if let Part::ToolCall { tool_call_id, tool_name: name, state, output, .. } =
                        part
                    {
                        if *tool_call_id == id {
                            *state = ToolState::OutputAvailable;
                            *output = Some(result.clone());
                            tool_name = name.clone();
                            break;
                        }
                    }
                }
                self.bus.emit(MuxEvent::ToolCallEnd {
                    workspace_id: *workspace_id,
                    message_id,
                    tool_call_id: id,
                    tool_name,
                    result,
                });
            }
            ProviderEvent::Finish { .. } | ProviderEvent::Error { .. } => {
                // Terminal events are handled by the drive loop.
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
