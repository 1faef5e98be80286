// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::provider::{Provider, ProviderEvent};
use crate::scenario::{MockScenarioPlayer, ScenarioStep};
use crate::stream::{NoTools, ToolCatalog};
use mux_core::clock::FakeClock;
use mux_core::message::{CompactionSource, TokenUsage};
use std::time::Duration;
use tempfile::TempDir;

fn ws() -> WorkspaceId {
    WorkspaceId::from_string("wks-orch")
}

struct Rig {
    orchestrator: Arc<SessionOrchestrator<FakeClock>>,
    history: Arc<HistoryLog>,
    player: Arc<MockScenarioPlayer>,
    events: Arc<Mutex<Vec<MuxEvent>>>,
    _dir: TempDir,
}

fn rig(player: MockScenarioPlayer) -> Rig {
    let dir = TempDir::new().unwrap();
    let session_root = dir.path().join("session");
    let lock = SessionLock::acquire(&session_root).unwrap();
    let history = Arc::new(HistoryLog::new(&session_root));
    let bus = EventBus::new();
    let events: Arc<Mutex<Vec<MuxEvent>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe(move |e| events.lock().push(e.clone()));
    }
    let clock = FakeClock::new();
    let compaction =
        Arc::new(CompactionEngine::with_clock(clock.clone(), history.clone(), bus.clone()));
    let player = Arc::new(player);
    let provider: Arc<dyn Provider> = player.clone();
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
    Rig { orchestrator, history, player, events, _dir: dir }
}

async fn wait_for_stream_start(r: &Rig) {
    for _ in 0..200 {
        if r.events.lock().iter().any(|e| matches!(e, MuxEvent::StreamStart { .. })) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream never started");
}

fn reply(text: &str) -> Vec<ScenarioStep> {
    vec![
        ScenarioStep::Emit(ProviderEvent::TextDelta { delta: text.into() }),
        ScenarioStep::Emit(ProviderEvent::Finish {
            usage: TokenUsage::default(),
            context_usage: None,
        }),
    ]
}

fn slow_reply(text: &str, pause: Duration) -> Vec<ScenarioStep> {
    vec![
        ScenarioStep::Emit(ProviderEvent::TextDelta { delta: text.into() }),
        ScenarioStep::Pause(pause),
        ScenarioStep::Emit(ProviderEvent::Finish {
            usage: TokenUsage::default(),
            context_usage: None,
        }),
    ]
}

#[tokio::test]
async fn send_appends_user_turn_and_streams_reply() {
    let r = rig(MockScenarioPlayer::with_scenario(reply("Hi there")));
    r.orchestrator
        .send_message(&ws(), "hello", None, SendOptions::default(), vec![])
        .await
        .unwrap();

    let history = r.history.read_history(&ws()).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text(), "hello");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text(), "Hi there");
    assert!(history[0].metadata.history_sequence < history[1].metadata.history_sequence);

    // User turn surfaced as a chat-event before the stream events.
    let events = r.events.lock();
    let first_chat = events
        .iter()
        .position(|e| matches!(e, MuxEvent::ChatEvent { message: ChatPayload::Message(_), .. }))
        .unwrap();
    let start = events.iter().position(|e| matches!(e, MuxEvent::StreamStart { .. })).unwrap();
    assert!(first_chat < start);
}

#[tokio::test]
async fn message_sent_mid_stream_is_queued_then_dispatched() {
    let player = MockScenarioPlayer::new();
    player.push_scenario(slow_reply("first answer", Duration::from_millis(300)));
    player.push_scenario(reply("second answer"));
    let r = rig(player);

    let orchestrator = r.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .send_message(&ws(), "first", None, SendOptions::default(), vec![])
            .await
    });

    // Wait until the first stream is live, then send a second message.
    wait_for_stream_start(&r).await;
    r.orchestrator
        .send_message(&ws(), "second", None, SendOptions::default(), vec![])
        .await
        .unwrap();
    assert_eq!(r.orchestrator.queued_display_text(&ws()).as_deref(), Some("second"));

    first.await.unwrap().unwrap();

    let history = r.history.read_history(&ws()).unwrap();
    let texts: Vec<String> = history.iter().map(Message::text).collect();
    assert_eq!(texts, vec!["first", "first answer", "second", "second answer"]);
    assert_eq!(r.player.remaining(), 0);
    assert_eq!(r.orchestrator.queued_display_text(&ws()), None);
}

#[tokio::test]
async fn compaction_request_mid_stream_with_queue_is_rejected() {
    let player = MockScenarioPlayer::new();
    player.push_scenario(slow_reply("thinking", Duration::from_millis(300)));
    player.push_scenario(reply("queued answer"));
    let r = rig(player);

    let orchestrator = r.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .send_message(&ws(), "work", None, SendOptions::default(), vec![])
            .await
    });
    wait_for_stream_start(&r).await;

    // Plain message queues fine.
    r.orchestrator
        .send_message(&ws(), "queued", None, SendOptions::default(), vec![])
        .await
        .unwrap();
    // Compaction on a non-empty queue is refused.
    let err = r
        .orchestrator
        .send_message(
            &ws(),
            "/compact",
            Some(MuxMetadata::CompactionRequest {
                source: CompactionSource::User,
                raw_command: Some("/compact".into()),
            }),
            SendOptions::default(),
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Queue(QueueError::CompactionBusy)));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn compaction_request_flows_to_a_boundary() {
    let r = rig(MockScenarioPlayer::with_scenario(reply("A compact summary")));
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
    let summary = history.last().unwrap();
    assert!(summary.metadata.compaction_boundary);
    assert_eq!(summary.metadata.compaction_epoch, Some(1));
    assert_eq!(summary.text(), "A compact summary");
}

#[tokio::test]
async fn clear_history_emits_delete_notice() {
    let r = rig(MockScenarioPlayer::with_scenario(reply("ok")));
    r.orchestrator
        .send_message(&ws(), "hello", None, SendOptions::default(), vec![])
        .await
        .unwrap();

    let removed = r.orchestrator.clear_history(&ws()).unwrap();
    assert_eq!(removed, vec![0, 1]);
    assert!(r.history.read_history(&ws()).unwrap().is_empty());

    let events = r.events.lock();
    let delete = events
        .iter()
        .find_map(|e| match e {
            MuxEvent::ChatEvent { message: ChatPayload::Delete(notice), .. } => Some(notice),
            _ => None,
        })
        .expect("delete notice emitted");
    assert_eq!(delete.history_sequences, vec![0, 1]);
}

struct NeverReady;

#[async_trait::async_trait]
impl ReadinessGate for NeverReady {
    async fn ensure_ready(
        &self,
        _opts: mux_runtime::contract::EnsureReadyOptions,
    ) -> Result<mux_runtime::contract::EnsureReadyOutcome, mux_runtime::error::RuntimeError> {
        Ok(mux_runtime::contract::EnsureReadyOutcome::NotReady {
            error: "workspace is gone".into(),
            error_type: ErrorType::RuntimeNotReady,
        })
    }
}

#[tokio::test]
async fn unready_runtime_surfaces_a_deterministic_pre_stream_error() {
    let dir = TempDir::new().unwrap();
    let session_root = dir.path().join("session");
    let lock = SessionLock::acquire(&session_root).unwrap();
    let history = Arc::new(HistoryLog::new(&session_root));
    let bus = EventBus::new();
    let events: Arc<Mutex<Vec<MuxEvent>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        bus.subscribe(move |e| events.lock().push(e.clone()));
    }
    let clock = FakeClock::new();
    let compaction =
        Arc::new(CompactionEngine::with_clock(clock.clone(), history.clone(), bus.clone()));
    let provider: Arc<dyn Provider> = Arc::new(MockScenarioPlayer::new());
    let catalog: Arc<dyn ToolCatalog> = Arc::new(NoTools);
    let stream = Arc::new(StreamManager::new(
        clock.clone(),
        bus.clone(),
        history.clone(),
        provider,
        catalog,
        compaction.clone(),
    ));
    let orchestrator = SessionOrchestrator::new(
        clock,
        bus,
        history.clone(),
        stream,
        compaction,
        "sonnet",
        "sys",
        lock,
    )
    .with_runtime(Arc::new(NeverReady));

    orchestrator
        .send_message(&ws(), "hello?", None, SendOptions::default(), vec![])
        .await
        .unwrap();

    // The user turn is visible; no assistant message followed.
    let history = history.read_history(&ws()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);

    let events = events.lock();
    let error = events
        .iter()
        .find_map(|e| match e {
            MuxEvent::Error { message_id, error_type, .. } => Some((*message_id, *error_type)),
            _ => None,
        })
        .expect("pre-stream error event");
    assert_eq!(error.0, mux_core::id::MessageId::for_pre_stream_error(&ws()));
    assert_eq!(error.1, ErrorType::RuntimeNotReady);
    assert!(!events.iter().any(|e| matches!(e, MuxEvent::StreamStart { .. })));
}

#[tokio::test]
async fn stop_aborts_and_queue_drains_afterwards() {
    let player = MockScenarioPlayer::new();
    player.push_scenario(vec![
        ScenarioStep::Emit(ProviderEvent::TextDelta { delta: "never finishes".into() }),
        ScenarioStep::Pause(Duration::from_secs(30)),
    ]);
    player.push_scenario(reply("after abort"));
    let r = rig(player);

    let orchestrator = r.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .send_message(&ws(), "long task", None, SendOptions::default(), vec![])
            .await
    });
    for _ in 0..100 {
        if r.history.read_partial(&ws()).unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    r.orchestrator
        .send_message(&ws(), "follow up", None, SendOptions::default(), vec![])
        .await
        .unwrap();
    r.orchestrator.stop(&ws(), AbortReason::UserCancelled);
    first.await.unwrap().unwrap();

    let history = r.history.read_history(&ws()).unwrap();
    let texts: Vec<String> = history.iter().map(Message::text).collect();
    assert_eq!(texts, vec!["long task", "follow up", "after abort"]);

    let events = r.events.lock();
    assert!(events.iter().any(|e| matches!(e, MuxEvent::StreamAbort { .. })));
}
