// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::Role;

fn ws() -> WorkspaceId {
    WorkspaceId::from_string("wks-test")
}

#[test]
fn stream_start_serializes_with_kebab_tag_and_camel_fields() {
    let event = MuxEvent::StreamStart {
        workspace_id: ws(),
        message_id: MessageId::from_string("msg-1"),
        model: "sonnet".into(),
        history_sequence: 7,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "stream-start");
    assert_eq!(json["workspaceId"], "wks-test");
    assert_eq!(json["historySequence"], 7);
}

#[test]
fn error_type_uses_snake_case_tags() {
    let json = serde_json::to_value(ErrorType::RuntimeNotReady).unwrap();
    assert_eq!(json, "runtime_not_ready");
    assert_eq!(ErrorType::RuntimeNotReady.to_string(), "runtime_not_ready");
}

#[test]
fn abort_reason_round_trips() {
    for reason in [AbortReason::UserCancelled, AbortReason::Timeout, AbortReason::RuntimeError] {
        let json = serde_json::to_string(&reason).unwrap();
        let back: AbortReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
}

#[test]
fn chat_payload_distinguishes_delete_from_message() {
    let delete = ChatPayload::Delete(DeleteNotice::new(vec![1, 2, 3]));
    let json = serde_json::to_value(&delete).unwrap();
    assert_eq!(json["type"], "delete");
    assert_eq!(json["historySequences"], serde_json::json!([1, 2, 3]));

    let back: ChatPayload = serde_json::from_value(json).unwrap();
    assert_eq!(back, delete);

    let msg = ChatPayload::Message(Box::new(Message::user("hi")));
    let json = serde_json::to_value(&msg).unwrap();
    let back: ChatPayload = serde_json::from_value(json).unwrap();
    match back {
        ChatPayload::Message(m) => assert_eq!(m.role, Role::User),
        other => panic!("expected message payload, got {other:?}"),
    }
}

#[test]
fn chat_event_can_nest_a_stream_event() {
    let nested = MuxEvent::StreamAbort {
        workspace_id: ws(),
        message_id: MessageId::from_string("msg-2"),
        reason: AbortReason::Timeout,
    };
    let event = MuxEvent::ChatEvent {
        workspace_id: ws(),
        message: ChatPayload::Stream(Box::new(nested.clone())),
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: MuxEvent = serde_json::from_str(&json).unwrap();
    match back {
        MuxEvent::ChatEvent { message: ChatPayload::Stream(inner), .. } => {
            assert_eq!(*inner, nested)
        }
        other => panic!("expected nested stream event, got {other:?}"),
    }
}

#[test]
fn workspace_id_accessor_covers_every_variant() {
    let event = MuxEvent::Error {
        workspace_id: ws(),
        message_id: MessageId::from_string("msg-3"),
        error: "nope".into(),
        error_type: ErrorType::Unknown,
    };
    assert_eq!(event.workspace_id(), &ws());
}
