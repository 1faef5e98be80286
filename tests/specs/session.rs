// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session specs: send → stream → compact, driven through the
//! orchestrator with the scripted provider.

use mux_core::bus::EventBus;
use mux_core::clock::FakeClock;
use mux_core::event::{ChatPayload, MuxEvent};
use mux_core::message::{CompactionSource, Message, MuxMetadata, Role, TokenUsage};
use mux_core::workspace::WorkspaceId;
use mux_session::compact::CompactionEngine;
use mux_session::history::{HistoryLog, SessionLock};
use mux_session::orchestrator::SessionOrchestrator;
use mux_session::provider::{Provider, ProviderEvent};
use mux_session::queue::SendOptions;
use mux_session::scenario::{MockScenarioPlayer, ScenarioStep};
use mux_session::stream::{NoTools, StreamManager, ToolCatalog};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

fn ws() -> WorkspaceId {
    WorkspaceId::from_string("wks-spec-ses")
}

struct Rig {
    orchestrator: Arc<SessionOrchestrator<FakeClock>>,
    history: Arc<HistoryLog>,
    events: Arc<Mutex<Vec<MuxEvent>>>,
    _dir: TempDir,
}

fn rig(player: MockScenarioPlayer) -> Rig {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("session");
    let lock = SessionLock::acquire(&root).unwrap();
    let history = Arc::new(HistoryLog::new(&root));
    let bus = EventBus::new();
    let events: Arc<Mutex<Vec<MuxEvent>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe(move |e| events.lock().push(e.clone()));
    }
    let clock = FakeClock::new();
    let compaction =
        Arc::new(CompactionEngine::with_clock(clock.clone(), history.clone(), bus.clone()));
    let provider: Arc<dyn Provider> = Arc::new(player);
    let catalog: Arc<dyn ToolCatalog> = Arc::new(NoTools);
    let stream = Arc::new(StreamManager::new(
        clock.clone(),
        bus.clone(),
        history.clone(),
        provider,
        catalog,
        compaction.clone(),
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        clock,
        bus,
        history.clone(),
        stream,
        compaction,
        "sonnet",
        "be helpful",
        lock,
    ));
    Rig { orchestrator, history, events, _dir: dir }
}

/// A normal turn then a manual compaction: the summary becomes a boundary,
/// sequences stay strictly monotonic, and the compaction emits chat-events
/// instead of deletes.
#[tokio::test]
async fn full_conversation_then_manual_compaction() {
    let player = MockScenarioPlayer::new();
    player.push_scenario(vec![
        ScenarioStep::Emit(ProviderEvent::TextDelta { delta: "I fixed the bug.".into() }),
        ScenarioStep::Emit(ProviderEvent::Finish {
            usage: TokenUsage { input_tokens: 50, output_tokens: 12, reasoning_tokens: 0 },
            context_usage: Some(420),
        }),
    ]);
    player.push_scenario(vec![
        ScenarioStep::Emit(ProviderEvent::TextDelta {
            delta: "Fixed an auth bug; tests pass.".into(),
        }),
        ScenarioStep::Emit(ProviderEvent::Finish {
            usage: TokenUsage { input_tokens: 80, output_tokens: 10, reasoning_tokens: 0 },
            context_usage: None,
        }),
    ]);
    let r = rig(player);

    r.orchestrator
        .send_message(&ws(), "fix the login bug", None, SendOptions::default(), vec![])
        .await
        .unwrap();
    r.orchestrator
        .send_message(
            &ws(),
            "Summarize this conversation",
            Some(MuxMetadata::CompactionRequest {
                source: CompactionSource::User,
                raw_command: Some("/compact".into()),
            }),
            SendOptions::default(),
            vec![],
        )
        .await
        .unwrap();

    let history = r.history.read_history(&ws()).unwrap();
    assert_eq!(history.len(), 4); // user, assistant, request, boundary

    let mut last_seq = None;
    for message in &history {
        let seq = message.metadata.history_sequence.unwrap();
        if let Some(last) = last_seq {
            assert!(seq > last);
        }
        last_seq = Some(seq);
    }

    let boundary = history.last().unwrap();
    assert_eq!(boundary.role, Role::Assistant);
    assert!(boundary.metadata.compaction_boundary);
    assert_eq!(boundary.metadata.compaction_epoch, Some(1));
    assert_eq!(boundary.metadata.compacted, Some(CompactionSource::User));
    assert_eq!(boundary.text(), "Fixed an auth bug; tests pass.");

    let events = r.events.lock();
    // Compaction emitted the summary as a chat-event, and nothing deleted.
    assert!(events.iter().any(|e| matches!(
        e,
        MuxEvent::ChatEvent { message: ChatPayload::Message(m), .. }
            if m.metadata.compaction_boundary
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, MuxEvent::ChatEvent { message: ChatPayload::Delete(_), .. })));
}

/// A second compaction derives the next epoch from the first.
#[tokio::test]
async fn epochs_increase_across_compactions() {
    let player = MockScenarioPlayer::new();
    for n in 1..=2 {
        player.push_scenario(vec![
            ScenarioStep::Emit(ProviderEvent::TextDelta { delta: format!("Summary {n}") }),
            ScenarioStep::Emit(ProviderEvent::Finish {
                usage: TokenUsage::default(),
                context_usage: None,
            }),
        ]);
    }
    let r = rig(player);

    for _ in 0..2 {
        r.orchestrator
            .send_message(
                &ws(),
                "Summarize this conversation",
                Some(MuxMetadata::CompactionRequest {
                    source: CompactionSource::User,
                    raw_command: Some("/compact".into()),
                }),
                SendOptions::default(),
                vec![],
            )
            .await
            .unwrap();
    }

    let history = r.history.read_history(&ws()).unwrap();
    let epochs: Vec<u64> = history
        .iter()
        .filter(|m| m.metadata.is_valid_boundary())
        .filter_map(|m| m.metadata.compaction_epoch)
        .collect();
    assert_eq!(epochs, vec![1, 2]);
}

/// History and sequencing survive a process restart.
#[tokio::test]
async fn sequences_continue_after_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("session");
    {
        let history = HistoryLog::new(&root);
        history.append_to_history(&ws(), Message::user("before restart")).unwrap();
    }
    let history = HistoryLog::new(&root);
    let appended = history.append_to_history(&ws(), Message::user("after restart")).unwrap();
    assert_eq!(appended.metadata.history_sequence, Some(1));
}
