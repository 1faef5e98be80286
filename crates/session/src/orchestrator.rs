// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestrator: the entry point for frontend requests.
//!
//! Each workspace behaves as a logical single-threaded actor: one stream at
//! a time, with messages arriving mid-stream coalesced in the queue and
//! dispatched when the active stream settles. Deletes are append-only from
//! the frontend's point of view — a `delete` chat-event carries the removed
//! sequence numbers.

use crate::compact::CompactionEngine;
use crate::history::{HistoryError, HistoryLog, SessionLock};
use crate::queue::{MessageQueue, QueueError, SendOptions};
use crate::stream::{StreamError, StreamManager, StreamOutcome};
use async_trait::async_trait;
use mux_core::bus::EventBus;
use mux_core::clock::{Clock, SystemClock};
use mux_core::event::{AbortReason, ChatPayload, DeleteNotice, ErrorType, MuxEvent};
use mux_core::id::MessageId;
use mux_core::message::{FileDiff, Message, MuxMetadata, Part, Role};
use mux_core::workspace::WorkspaceId;
use mux_runtime::contract::{EnsureReadyOptions, EnsureReadyOutcome, Runtime};
use mux_runtime::error::RuntimeError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// The slice of the Runtime contract the orchestrator gates streams on.
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn ensure_ready(
        &self,
        opts: EnsureReadyOptions,
    ) -> Result<EnsureReadyOutcome, RuntimeError>;
}

#[async_trait]
impl<T: Runtime + ?Sized> ReadinessGate for T {
    async fn ensure_ready(
        &self,
        opts: EnsureReadyOptions,
    ) -> Result<EnsureReadyOutcome, RuntimeError> {
        Runtime::ensure_ready(self, opts).await
    }
}

pub struct SessionOrchestrator<C: Clock = SystemClock> {
    clock: C,
    bus: EventBus,
    history: Arc<HistoryLog>,
    stream: Arc<StreamManager<C>>,
    compaction: Arc<CompactionEngine<C>>,
    queues: Mutex<HashMap<WorkspaceId, MessageQueue>>,
    /// Gates every stream on runtime readiness when set.
    runtime: Option<Arc<dyn ReadinessGate>>,
    default_model: String,
    system_prompt: String,
    /// Held for the whole session: one writer per session root.
    _lock: SessionLock,
}

impl<C: Clock> SessionOrchestrator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        bus: EventBus,
        history: Arc<HistoryLog>,
        stream: Arc<StreamManager<C>>,
        compaction: Arc<CompactionEngine<C>>,
        default_model: impl Into<String>,
        system_prompt: impl Into<String>,
        lock: SessionLock,
    ) -> Self {
        Self {
            clock,
            bus,
            history,
            stream,
            compaction,
            queues: Mutex::new(HashMap::new()),
            runtime: None,
            default_model: default_model.into(),
            system_prompt: system_prompt.into(),
            _lock: lock,
        }
    }

    /// Gate streams behind this runtime's readiness.
    pub fn with_runtime(mut self, runtime: Arc<dyn ReadinessGate>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Pre-stream readiness check. A failure synthesizes a deterministic
    /// message id so the frontend can pin the error to a visible turn.
    async fn gate_ready(&self, workspace_id: &WorkspaceId) -> bool {
        let Some(runtime) = &self.runtime else { return true };
        let (error, error_type) =
            match runtime.ensure_ready(EnsureReadyOptions::default()).await {
                Ok(EnsureReadyOutcome::Ready) => return true,
                Ok(EnsureReadyOutcome::NotReady { error, error_type }) => (error, error_type),
                Err(e) => (e.to_string(), ErrorType::RuntimeStartFailed),
            };
        self.bus.emit(MuxEvent::Error {
            workspace_id: *workspace_id,
            message_id: MessageId::for_pre_stream_error(workspace_id),
            error,
            error_type,
        });
        false
    }

    /// Handle a frontend send: stream now, or coalesce while one is active.
    pub async fn send_message(
        &self,
        workspace_id: &WorkspaceId,
        text: &str,
        mux_metadata: Option<MuxMetadata>,
        options: SendOptions,
        images: Vec<Part>,
    ) -> Result<(), OrchestratorError> {
        if self.stream.is_streaming(workspace_id) {
            self.enqueue(workspace_id, text, mux_metadata, options, images)?;
            return Ok(());
        }
        self.dispatch(workspace_id, text.to_string(), mux_metadata, options, images).await
    }

    fn enqueue(
        &self,
        workspace_id: &WorkspaceId,
        text: &str,
        mux_metadata: Option<MuxMetadata>,
        options: SendOptions,
        images: Vec<Part>,
    ) -> Result<(), OrchestratorError> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(*workspace_id).or_default();
        queue.add(text, mux_metadata, options, images)?;
        tracing::debug!(workspace = %workspace_id, queued = %queue.display_text(), "message queued");
        Ok(())
    }

    /// Append the user turn, run the stream, then drain anything queued.
    async fn dispatch(
        &self,
        workspace_id: &WorkspaceId,
        mut text: String,
        mut mux_metadata: Option<MuxMetadata>,
        mut options: SendOptions,
        mut images: Vec<Part>,
    ) -> Result<(), OrchestratorError> {
        loop {
            let mut user = Message {
                id: mux_core::id::MessageId::new(),
                role: Role::User,
                parts: std::iter::once(Part::text(text.clone()))
                    .filter(|_| !text.is_empty())
                    .chain(images.drain(..))
                    .collect(),
                metadata: Default::default(),
            };
            user.metadata.timestamp = Some(self.clock.epoch_ms());
            user.metadata.mux_metadata = mux_metadata.take();
            let user = self.history.append_to_history(workspace_id, user)?;
            self.bus.emit(MuxEvent::ChatEvent {
                workspace_id: *workspace_id,
                message: ChatPayload::Message(Box::new(user)),
            });

            if !self.gate_ready(workspace_id).await {
                return Ok(());
            }

            let model = options.model.clone().unwrap_or_else(|| self.default_model.clone());
            match self.stream.run(workspace_id, &model, &self.system_prompt).await {
                Ok(outcome) => {
                    if let StreamOutcome::Errored { error, .. } = &outcome {
                        tracing::warn!(workspace = %workspace_id, error = %error, "stream errored");
                    }
                }
                Err(StreamError::AlreadyStreaming) => {
                    // Raced another dispatcher: the running stream's drain
                    // will pick our queue up.
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let produced = self
                .queues
                .lock()
                .get_mut(workspace_id)
                .and_then(MessageQueue::produce_message);
            match produced {
                Some(next) => {
                    text = next.text;
                    mux_metadata = next.mux_metadata;
                    options = next.options;
                    images = next.images;
                }
                None => return Ok(()),
            }
        }
    }

    /// Abort the workspace's active stream.
    pub fn stop(&self, workspace_id: &WorkspaceId, reason: AbortReason) {
        self.stream.stop(workspace_id, reason);
    }

    /// Clear a workspace's history, emitting the delete notice.
    pub fn clear_history(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<u64>, OrchestratorError> {
        let removed = self.history.clear_history(workspace_id)?;
        self.bus.emit(MuxEvent::ChatEvent {
            workspace_id: *workspace_id,
            message: ChatPayload::Delete(DeleteNotice::new(removed.clone())),
        });
        Ok(removed)
    }

    /// Display text for the queued batch, if any.
    pub fn queued_display_text(&self, workspace_id: &WorkspaceId) -> Option<String> {
        let queues = self.queues.lock();
        let queue = queues.get(workspace_id)?;
        if queue.is_empty() {
            return None;
        }
        Some(queue.display_text())
    }

    /// Post-compaction replay hooks.
    pub fn peek_pending_diffs(&self, workspace_id: &WorkspaceId) -> Option<Vec<FileDiff>> {
        self.compaction.peek_pending_diffs(workspace_id)
    }

    pub fn ack_pending_diffs_consumed(&self, workspace_id: &WorkspaceId) {
        self.compaction.ack_pending_diffs_consumed(workspace_id);
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
