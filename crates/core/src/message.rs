// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message, part, and metadata model for per-workspace history.
//!
//! Wire format is camelCase JSON. History files written by older frontends
//! may carry malformed sequence numbers, boolean `compacted` flags, or
//! boundary markers with missing epochs; the lenient deserializers here map
//! those to `None` instead of failing the whole file, matching the
//! skip-malformed rules the history log and compaction engine rely on.

use crate::id::{MessageId, ToolCallId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

crate::simple_display! {
    Role {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
}

/// Lifecycle state of a tool-call part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    Error,
}

/// One segment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_call_id: ToolCallId,
        tool_name: String,
        #[serde(default)]
        input: Value,
        state: ToolState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Image {
        media_type: String,
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Successful `file_edit_*` tool output, decoded as a path+diff pair.
    pub fn file_edit_output(&self) -> Option<FileDiff> {
        let Part::ToolCall { tool_name, state, output, .. } = self else {
            return None;
        };
        if !tool_name.starts_with("file_edit_") || *state != ToolState::OutputAvailable {
            return None;
        }
        output.as_ref().and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A file edit captured for post-compaction reinjection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

/// Who (or what) triggered a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionSource {
    User,
    Idle,
}

crate::simple_display! {
    CompactionSource {
        User => "user",
        Idle => "idle",
    }
}

/// mux-specific message classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MuxMetadata {
    Normal,
    CompactionRequest {
        #[serde(default = "default_compaction_source")]
        source: CompactionSource,
        /// Raw slash command as typed, e.g. `/compact`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_command: Option<String>,
    },
    CompactionSummary,
}

fn default_compaction_source() -> CompactionSource {
    CompactionSource::User
}

impl Default for MuxMetadata {
    fn default() -> Self {
        MuxMetadata::Normal
    }
}

/// Token usage reported by the provider at stream end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Per-message metadata. Set at append, preserved across reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Wall-clock timestamp in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux_metadata: Option<MuxMetadata>,
    /// Assigned by the history log; strictly increasing per workspace.
    #[serde(
        default,
        deserialize_with = "lenient_non_negative",
        skip_serializing_if = "Option::is_none"
    )]
    pub history_sequence: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_compacted",
        skip_serializing_if = "Option::is_none"
    )]
    pub compacted: Option<CompactionSource>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compaction_boundary: bool,
    #[serde(
        default,
        deserialize_with = "lenient_positive",
        skip_serializing_if = "Option::is_none"
    )]
    pub compaction_epoch: Option<u64>,
    /// Context tokens consumed, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_provider_metadata: Option<Value>,
}

impl Metadata {
    /// True when this message is a well-formed compaction boundary:
    /// boundary flag set, compacted ∈ {user, idle}, epoch ≥ 1.
    pub fn is_valid_boundary(&self) -> bool {
        self.compaction_boundary && self.compacted.is_some() && self.compaction_epoch.is_some()
    }
}

/// Accept any JSON value; keep only non-negative integers.
fn lenient_non_negative<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(Value::as_u64))
}

/// Accept any JSON value; keep only integers ≥ 1.
fn lenient_positive<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(Value::as_u64).filter(|n| *n >= 1))
}

/// Accept `"user"`, `"idle"`, and legacy booleans (`true` → user).
fn lenient_compacted<'de, D>(deserializer: D) -> Result<Option<CompactionSource>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::String(s)) if s == "user" => Some(CompactionSource::User),
        Some(Value::String(s)) if s == "idle" => Some(CompactionSource::Idle),
        Some(Value::Bool(true)) => Some(CompactionSource::User),
        _ => None,
    })
}

/// A single entry in a workspace's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            parts: vec![Part::text(text)],
            metadata: Metadata::default(),
        }
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Self { id: MessageId::new(), role: Role::Assistant, parts, metadata: Metadata::default() }
    }

    /// Concatenated text-part content.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect::<Vec<_>>().join("")
    }

    pub fn is_compaction_request(&self) -> bool {
        matches!(
            self.metadata.mux_metadata,
            Some(MuxMetadata::CompactionRequest { .. })
        )
    }

    /// Source and raw command of a compaction request, if this is one.
    pub fn compaction_request(&self) -> Option<(CompactionSource, Option<&str>)> {
        match &self.metadata.mux_metadata {
            Some(MuxMetadata::CompactionRequest { source, raw_command }) => {
                Some((*source, raw_command.as_deref()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
