//! Hostile and malformed client frames must fail cleanly, never panic.

use chat_service::realtime::events::ClientEvent;

fn parse(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(raw)
}

#[test]
fn garbage_payloads_are_rejected() {
    for raw in [
        "",
        "not json",
        "{}",
        r#"{"type":null}"#,
        r#"{"type":42}"#,
        r#"{"type":"unknown_event"}"#,
        r#"{"type":"join_conversation"}"#,
        r#"{"type":"join_conversation","conversation_id":"not-a-uuid"}"#,
        r#"{"type":"send_message"}"#,
        r#"{"type":"send_message","conversation_id":"00000000-0000-0000-0000-000000000000"}"#,
        r#"{"type":"mark_message_read","message_id":"00000000-0000-0000-0000-000000000000"}"#,
        r#"[1,2,3]"#,
        r#""just a string""#,
    ] {
        assert!(parse(raw).is_err(), "expected rejection for: {raw}");
    }
}

#[test]
fn extra_fields_are_tolerated() {
    let raw = r#"{
        "type": "typing_start",
        "conversation_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
        "client_ts": 1724630000
    }"#;
    assert!(matches!(
        parse(raw).unwrap(),
        ClientEvent::TypingStart { .. }
    ));
}

#[test]
fn create_conversation_parses_full_payload() {
    let raw = r#"{
        "type": "create_conversation",
        "kind": "group",
        "name": "platform-team",
        "member_ids": ["3fa85f64-5717-4562-b3fc-2c963f66afa6"]
    }"#;
    match parse(raw).unwrap() {
        ClientEvent::CreateConversation(req) => {
            assert_eq!(req.kind, "group");
            assert_eq!(req.name.as_deref(), Some("platform-team"));
            assert_eq!(req.member_ids.len(), 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
