// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider contract: a cold sequence of typed stream events.
//!
//! Concrete providers live outside the core; the stream manager consumes
//! exactly this vocabulary through a bounded channel, which is also the
//! back-pressure boundary — a slow consumer slows the producer.

use mux_core::event::ErrorType;
use mux_core::id::ToolCallId;
use mux_core::message::{Message, TokenUsage};
use mux_core::workspace::WorkspaceId;
use serde_json::Value;
use tokio::sync::mpsc;

/// Channel depth between provider and stream manager.
pub const STREAM_BUFFER: usize = 64;

/// Events a provider may emit, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta { delta: String },
    ReasoningDelta { delta: String },
    ToolCallStart { id: ToolCallId, name: String, args: Value },
    ToolCallEnd { id: ToolCallId, result: Value },
    Finish { usage: TokenUsage, context_usage: Option<u64> },
    Error { message: String, kind: ErrorType },
}

/// One tool offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Everything a provider needs to open one stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub workspace_id: WorkspaceId,
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

/// A language-model provider.
pub trait Provider: Send + Sync {
    /// Open a stream; events arrive on the returned receiver. Dropping the
    /// receiver cancels provider-side production.
    fn open_stream(&self, request: StreamRequest) -> mpsc::Receiver<ProviderEvent>;
}
