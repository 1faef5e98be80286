// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compaction engine: turns a summarization stream into a durable boundary.
//!
//! Triggered by a stream end whose latest user message carries a
//! compaction-request. The commit is strictly append-only — one summary
//! message lands with boundary markers and a fresh epoch, or replaces the
//! last message iff that message already has the streamed summary's id.
//! File-edit diffs from the closing epoch are persisted to the
//! `post-compaction.json` sidecar before the summary lands, and only an
//! explicit consumer acknowledgement removes them.

use crate::history::HistoryLog;
use mux_core::bus::EventBus;
use mux_core::clock::{Clock, SystemClock};
use mux_core::event::{ChatPayload, MuxEvent};
use mux_core::id::MessageId;
use mux_core::message::{
    CompactionSource, FileDiff, Message, Metadata, MuxMetadata, Part, Role, TokenUsage,
};
use mux_core::workspace::WorkspaceId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Window inspected for the triggering request and the closing epoch.
const DETECTION_WINDOW: usize = 10;

/// What the stream manager observed at stream end.
#[derive(Debug, Clone)]
pub struct StreamEndInfo {
    pub message_id: MessageId,
    pub parts: Vec<Part>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub duration_ms: Option<u64>,
    /// Context usage as reported by the provider event, if any.
    pub context_usage: Option<u64>,
    pub system_message_tokens: u64,
    pub provider_metadata: Option<Value>,
    pub context_provider_metadata: Option<Value>,
}

pub struct CompactionEngine<C: Clock = SystemClock> {
    clock: C,
    history: Arc<HistoryLog>,
    bus: EventBus,
    processed: Mutex<HashMap<WorkspaceId, HashSet<MessageId>>>,
    attachments_pending: Mutex<HashSet<WorkspaceId>>,
}

impl CompactionEngine<SystemClock> {
    pub fn new(history: Arc<HistoryLog>, bus: EventBus) -> Self {
        Self::with_clock(SystemClock, history, bus)
    }
}

impl<C: Clock> CompactionEngine<C> {
    pub fn with_clock(clock: C, history: Arc<HistoryLog>, bus: EventBus) -> Self {
        Self {
            clock,
            history,
            bus,
            processed: Mutex::new(HashMap::new()),
            attachments_pending: Mutex::new(HashSet::new()),
        }
    }

    /// Handle a stream completion. Returns true when the completion was a
    /// compaction (committed now or already processed); false means the
    /// caller should run the normal append path.
    pub fn handle_completion(&self, workspace_id: &WorkspaceId, end: &StreamEndInfo) -> bool {
        let Ok(recent) = self.history.get_last_messages(workspace_id, DETECTION_WINDOW) else {
            return false;
        };
        let Some(request) = recent.iter().rev().find(|m| m.role == Role::User) else {
            return false;
        };
        let Some((source, _)) = request.compaction_request() else {
            return false;
        };
        if self
            .processed
            .lock()
            .get(workspace_id)
            .is_some_and(|seen| seen.contains(&request.id))
        {
            return true;
        }

        let summary_text: String =
            end.parts.iter().filter_map(Part::as_text).collect::<Vec<_>>().join("");
        if !summary_is_acceptable(&summary_text) {
            tracing::warn!(workspace = %workspace_id, "summary_rejected: empty or raw json object");
            return false;
        }

        // The commit is idempotent w.r.t. the in-progress snapshot.
        let _ = self.history.delete_partial(workspace_id);

        let diffs = epoch_file_diffs(&recent);
        if self.history.write_pending_diffs(workspace_id, &diffs).is_err() {
            return false;
        }

        let Ok(full) = self.history.read_history(workspace_id) else {
            let _ = self.history.ack_pending_diffs(workspace_id);
            return false;
        };

        let epoch = next_epoch(&full);
        let sequence = full
            .iter()
            .filter_map(|m| m.metadata.history_sequence)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        let timestamp = self.summary_timestamp(source, request, &full);
        let context_usage = derive_context_usage(
            end.context_usage,
            end.usage.as_ref(),
            end.system_message_tokens,
        );

        let summary = Message {
            id: end.message_id,
            role: Role::Assistant,
            parts: end.parts.clone(),
            metadata: Metadata {
                timestamp: Some(timestamp),
                model: end.model.clone(),
                usage: end.usage,
                duration_ms: end.duration_ms,
                mux_metadata: Some(MuxMetadata::CompactionSummary),
                history_sequence: Some(sequence),
                compacted: Some(source),
                compaction_boundary: true,
                compaction_epoch: Some(epoch),
                context_usage,
                // Stale provider metadata inflates downstream display.
                provider_metadata: None,
                context_provider_metadata: None,
            },
        };

        let reuse_in_place = full.last().map(|m| m.id) == Some(end.message_id);
        let committed = if reuse_in_place {
            self.history.update_history(workspace_id, summary.clone()).is_ok()
        } else {
            self.history.append_to_history(workspace_id, summary.clone()).is_ok()
        };
        if !committed {
            let _ = self.history.ack_pending_diffs(workspace_id);
            return false;
        }

        self.processed.lock().entry(*workspace_id).or_default().insert(request.id);
        self.attachments_pending.lock().insert(*workspace_id);

        let usage = end.usage.unwrap_or_default();
        tracing::info!(
            workspace = %workspace_id,
            compaction_source = %source,
            epoch,
            input_tokens = round_pow2(usage.input_tokens),
            output_tokens = round_pow2(usage.output_tokens),
            diffs = diffs.len(),
            "compaction committed"
        );

        self.bus.emit(MuxEvent::ChatEvent {
            workspace_id: *workspace_id,
            message: ChatPayload::Message(Box::new(summary.clone())),
        });
        self.bus.emit(MuxEvent::ChatEvent {
            workspace_id: *workspace_id,
            message: ChatPayload::Stream(Box::new(MuxEvent::StreamEnd {
                workspace_id: *workspace_id,
                message_id: summary.id,
                parts: summary.parts.clone(),
                metadata: summary.metadata,
            })),
        });
        true
    }

    /// Idle compaction preserves recency: the newest of (last user message
    /// that is not the request, last compacted assistant message — a prior
    /// summary, not an ordinary reply). Manual compaction stamps now.
    fn summary_timestamp(
        &self,
        source: CompactionSource,
        request: &Message,
        full: &[Message],
    ) -> u64 {
        match source {
            CompactionSource::User => self.clock.epoch_ms(),
            CompactionSource::Idle => {
                let last_user = full
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User && m.id != request.id)
                    .and_then(|m| m.metadata.timestamp);
                let last_compacted = full
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant && m.metadata.compacted.is_some())
                    .and_then(|m| m.metadata.timestamp);
                last_user
                    .into_iter()
                    .chain(last_compacted)
                    .max()
                    .unwrap_or_else(|| self.clock.epoch_ms())
            }
        }
    }

    /// Read the pending diffs without consuming them.
    pub fn peek_pending_diffs(&self, workspace_id: &WorkspaceId) -> Option<Vec<FileDiff>> {
        self.history.peek_pending_diffs(workspace_id).ok().flatten()
    }

    /// Consumer acknowledgement: removes the sidecar and clears the flag.
    pub fn ack_pending_diffs_consumed(&self, workspace_id: &WorkspaceId) {
        let _ = self.history.ack_pending_diffs(workspace_id);
        self.attachments_pending.lock().remove(workspace_id);
    }

    /// Whether a commit is awaiting post-compaction reinjection.
    pub fn attachments_pending(&self, workspace_id: &WorkspaceId) -> bool {
        self.attachments_pending.lock().contains(workspace_id)
    }
}

/// Reject empty summaries and raw JSON objects (leaked tool payloads).
/// Arrays and prose with embedded JSON substrings pass.
fn summary_is_acceptable(summary: &str) -> bool {
    let trimmed = summary.trim();
    if trimmed.is_empty() {
        return false;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => !value.is_object(),
        Err(_) => true,
    }
}

/// Successful file-edit outputs after the latest well-formed boundary in
/// the window, in order. No boundary means the whole window counts.
fn epoch_file_diffs(window: &[Message]) -> Vec<FileDiff> {
    let boundary_seq = window
        .iter()
        .rev()
        .find(|m| m.metadata.is_valid_boundary())
        .and_then(|m| m.metadata.history_sequence);
    window
        .iter()
        .filter(|m| match boundary_seq {
            Some(boundary) => m
                .metadata
                .history_sequence
                .map(|seq| seq > boundary)
                .unwrap_or(false),
            None => true,
        })
        .flat_map(|m| m.parts.iter().filter_map(Part::file_edit_output))
        .collect()
}

/// Next epoch: 1 + the highest valid boundary epoch, with each legacy
/// `compacted="user"` marker (no boundary flags) counting as one epoch so
/// pre-boundary history cannot be ignored.
fn next_epoch(full: &[Message]) -> u64 {
    let max_valid = full
        .iter()
        .filter(|m| m.metadata.is_valid_boundary())
        .filter_map(|m| m.metadata.compaction_epoch)
        .max()
        .unwrap_or(0);
    let legacy = full
        .iter()
        .filter(|m| !m.metadata.compaction_boundary && m.metadata.compacted.is_some())
        .count() as u64;
    max_valid + legacy + 1
}

/// Prefer the event's value; else `output - reasoning + system`, omitting
/// negative results.
pub(crate) fn derive_context_usage(
    event_value: Option<u64>,
    usage: Option<&TokenUsage>,
    system_message_tokens: u64,
) -> Option<u64> {
    if event_value.is_some() {
        return event_value;
    }
    let usage = usage?;
    let derived = usage.output_tokens as i64 - usage.reasoning_tokens as i64
        + system_message_tokens as i64;
    u64::try_from(derived).ok()
}

/// Round to the nearest power of two (telemetry coarsening).
fn round_pow2(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let floor_exp = 63 - n.leading_zeros() as u64;
    let lower = 1u64 << floor_exp;
    if floor_exp >= 63 {
        return lower;
    }
    let upper = lower << 1;
    if n - lower < upper - n {
        lower
    } else {
        upper
    }
}

#[cfg(test)]
#[path = "compact_tests.rs"]
mod tests;
