// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed events emitted by the stream manager and compaction engine.
//!
//! Serializes with `{"type": "stream-start", ...fields}` format. Subscribers
//! on the event bus are frontend bridges; the vocabulary here is the whole
//! contract between the core and the UI.

use crate::id::{MessageId, ToolCallId};
use crate::message::{Message, Metadata, Part};
use crate::workspace::WorkspaceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classified error kinds surfaced to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Authentication,
    RuntimeNotReady,
    RuntimeStartFailed,
    ModelNotFound,
    Unknown,
}

crate::simple_display! {
    ErrorType {
        Authentication => "authentication",
        RuntimeNotReady => "runtime_not_ready",
        RuntimeStartFailed => "runtime_start_failed",
        ModelNotFound => "model_not_found",
        Unknown => "unknown",
    }
}

/// Why a stream was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    UserCancelled,
    Timeout,
    RuntimeError,
}

/// `{"type": "delete", "historySequences": [...]}` chat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNotice {
    #[serde(rename = "type")]
    pub kind: DeleteTag,
    pub history_sequences: Vec<u64>,
}

impl DeleteNotice {
    pub fn new(history_sequences: Vec<u64>) -> Self {
        Self { kind: DeleteTag::Delete, history_sequences }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteTag {
    Delete,
}

/// Payload of a `chat-event`: a full message, a delete notice, or a nested
/// stream event being replayed into the chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPayload {
    Delete(DeleteNotice),
    Message(Box<Message>),
    Stream(Box<MuxEvent>),
}

/// Events dispatched through the process-wide [`crate::bus::EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MuxEvent {
    StreamStart {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        model: String,
        history_sequence: u64,
    },
    StreamDelta {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        delta: String,
        tokens: u64,
        timestamp: u64,
    },
    ReasoningDelta {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        delta: String,
        tokens: u64,
        timestamp: u64,
    },
    ToolCallStart {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        tool_call_id: ToolCallId,
        tool_name: String,
        args: Value,
        tokens: u64,
        timestamp: u64,
    },
    ToolCallEnd {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        tool_call_id: ToolCallId,
        tool_name: String,
        result: Value,
    },
    StreamEnd {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        parts: Vec<Part>,
        metadata: Metadata,
    },
    Error {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        error: String,
        error_type: ErrorType,
    },
    StreamAbort {
        workspace_id: WorkspaceId,
        message_id: MessageId,
        reason: AbortReason,
    },
    ChatEvent {
        workspace_id: WorkspaceId,
        message: ChatPayload,
    },
}

impl MuxEvent {
    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            MuxEvent::StreamStart { workspace_id, .. }
            | MuxEvent::StreamDelta { workspace_id, .. }
            | MuxEvent::ReasoningDelta { workspace_id, .. }
            | MuxEvent::ToolCallStart { workspace_id, .. }
            | MuxEvent::ToolCallEnd { workspace_id, .. }
            | MuxEvent::StreamEnd { workspace_id, .. }
            | MuxEvent::Error { workspace_id, .. }
            | MuxEvent::StreamAbort { workspace_id, .. }
            | MuxEvent::ChatEvent { workspace_id, .. } => workspace_id,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
