// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compaction specs: epoch derivation, diff capture, recency timestamps.

use mux_core::bus::EventBus;
use mux_core::clock::{Clock, FakeClock};
use mux_core::id::{MessageId, ToolCallId};
use mux_core::message::{
    CompactionSource, Message, MuxMetadata, Part, TokenUsage, ToolState,
};
use mux_core::workspace::WorkspaceId;
use mux_session::compact::{CompactionEngine, StreamEndInfo};
use mux_session::history::HistoryLog;
use similar_asserts::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn ws() -> WorkspaceId {
    WorkspaceId::from_string("wks-spec-cmp")
}

fn edit(path: &str) -> Message {
    Message::assistant(vec![Part::ToolCall {
        tool_call_id: ToolCallId::new(format!("call-{path}")),
        tool_name: "file_edit_apply".into(),
        input: serde_json::Value::Null,
        state: ToolState::OutputAvailable,
        output: Some(serde_json::json!({"path": path, "diff": format!("@@ {path}")})),
        error: None,
    }])
}

fn request(source: CompactionSource) -> Message {
    let mut msg = Message::user("/compact");
    msg.metadata.mux_metadata = Some(MuxMetadata::CompactionRequest {
        source,
        raw_command: Some("/compact".into()),
    });
    msg
}

fn summary_end(text: &str) -> StreamEndInfo {
    StreamEndInfo {
        message_id: MessageId::from_string("msg-spec-sum"),
        parts: vec![Part::text(text)],
        model: Some("sonnet".into()),
        usage: Some(TokenUsage { input_tokens: 64, output_tokens: 32, reasoning_tokens: 8 }),
        duration_ms: Some(900),
        context_usage: None,
        system_message_tokens: 16,
        provider_metadata: None,
        context_provider_metadata: None,
    }
}

/// Spec seed 2: mixed markers. A well-formed boundary at epoch 3 plus a
/// malformed marker; only post-boundary edits land in the sidecar, and the
/// new boundary takes epoch 4 with the next free sequence.
#[test]
fn epoch_derivation_skips_malformed_markers() {
    let dir = TempDir::new().unwrap();
    let history = Arc::new(HistoryLog::new(dir.path()));
    let engine = CompactionEngine::new(history.clone(), EventBus::new());

    history.append_to_history(&ws(), edit("/tmp/stale.ts")).unwrap();

    let mut boundary = Message::assistant(vec![Part::text("earlier summary")]);
    boundary.metadata.compaction_boundary = true;
    boundary.metadata.compacted = Some(CompactionSource::User);
    boundary.metadata.compaction_epoch = Some(3);
    history.append_to_history(&ws(), boundary).unwrap();

    // Malformed: boundary flag without an epoch.
    let mut malformed = Message::assistant(vec![Part::text("broken")]);
    malformed.metadata.compaction_boundary = true;
    malformed.metadata.compacted = Some(CompactionSource::User);
    history.append_to_history(&ws(), malformed).unwrap();

    history.append_to_history(&ws(), edit("/tmp/recent.ts")).unwrap();
    history.append_to_history(&ws(), request(CompactionSource::User)).unwrap();

    assert!(engine.handle_completion(&ws(), &summary_end("Summary")));

    let diffs = engine.peek_pending_diffs(&ws()).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].path, "/tmp/recent.ts");

    let summary = history.read_history(&ws()).unwrap().last().cloned().unwrap();
    assert_eq!(summary.metadata.compaction_epoch, Some(4));
    assert!(summary.metadata.compaction_boundary);
    assert_eq!(summary.metadata.history_sequence, Some(5));
}

/// Spec seed 3: idle compaction keeps the conversation's real recency —
/// the old user turn, not the assistant reply that followed it.
#[test]
fn idle_compaction_preserves_the_old_user_timestamp() {
    let dir = TempDir::new().unwrap();
    let history = Arc::new(HistoryLog::new(dir.path()));
    let clock = FakeClock::new();
    clock.set_epoch_ms(10_000_000);
    let engine = CompactionEngine::with_clock(clock.clone(), history.clone(), EventBus::new());

    let now = clock.epoch_ms();
    let mut user = Message::user("the actual question");
    user.metadata.timestamp = Some(now - 3_600_000);
    history.append_to_history(&ws(), user).unwrap();

    // Ordinary reply, newer than the user turn; not a compacted summary,
    // so it must not drag recency forward.
    let mut reply = Message::assistant(vec![Part::text("answered")]);
    reply.metadata.timestamp = Some(now - 1_800_000);
    history.append_to_history(&ws(), reply).unwrap();

    let mut idle_request = request(CompactionSource::Idle);
    idle_request.metadata.timestamp = Some(now);
    history.append_to_history(&ws(), idle_request).unwrap();

    assert!(engine.handle_completion(&ws(), &summary_end("Summary")));

    let summary = history.read_history(&ws()).unwrap().last().cloned().unwrap();
    assert_eq!(summary.metadata.timestamp, Some(now - 3_600_000));
    assert_eq!(summary.metadata.compacted, Some(CompactionSource::Idle));
}

/// Compaction is append-only: one boundary lands and nothing is removed.
#[test]
fn commit_grows_history_by_exactly_one() {
    let dir = TempDir::new().unwrap();
    let history = Arc::new(HistoryLog::new(dir.path()));
    let engine = CompactionEngine::new(history.clone(), EventBus::new());

    history.append_to_history(&ws(), Message::user("some work")).unwrap();
    history.append_to_history(&ws(), edit("/tmp/one.rs")).unwrap();
    history.append_to_history(&ws(), request(CompactionSource::User)).unwrap();
    let before = history.read_history(&ws()).unwrap();

    assert!(engine.handle_completion(&ws(), &summary_end("Summary of work")));

    let after = history.read_history(&ws()).unwrap();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(&after[..before.len()], &before[..]);
}

/// The sidecar persists across engine restarts until acknowledged.
#[test]
fn pending_diffs_survive_a_restart_until_acked() {
    let dir = TempDir::new().unwrap();
    {
        let history = Arc::new(HistoryLog::new(dir.path()));
        let engine = CompactionEngine::new(history.clone(), EventBus::new());
        history.append_to_history(&ws(), edit("/tmp/persist.rs")).unwrap();
        history.append_to_history(&ws(), request(CompactionSource::User)).unwrap();
        assert!(engine.handle_completion(&ws(), &summary_end("Summary")));
    }

    // A fresh process still sees the diffs.
    let history = Arc::new(HistoryLog::new(dir.path()));
    let engine = CompactionEngine::new(history.clone(), EventBus::new());
    let diffs = engine.peek_pending_diffs(&ws()).unwrap();
    assert_eq!(diffs[0].path, "/tmp/persist.rs");

    engine.ack_pending_diffs_consumed(&ws());
    assert_eq!(engine.peek_pending_diffs(&ws()), None);
}
