use serde_json::json;

use super::*;
use crate::event::AgentMessageEvent;
use crate::event::SessionConfiguredEvent;
use pretty_assertions::assert_eq;

fn agent_message(text: &str) -> EventMsg {
    EventMsg::AgentMessage(AgentMessageEvent {
        message: text.to_string(),
    })
}

/// Two sessions mounted side by side, as when a background session keeps
/// streaming while another is in view.
fn two_sessions(state: &mut ChatState) -> (String, String) {
    let first = open_session(state);
    let second = state.store.create_session(None);
    state.mount(&second);
    (first, second)
}

#[test]
fn redelivered_event_is_applied_once() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver(&mut state, "m1", &session, agent_message("hi"));
    deliver(&mut state, "m1", &session, agent_message("hi"));
    assert_eq!(entries_with_role(&state, &session, Role::Assistant).len(), 1);

    // Same id under a different kind is a different event.
    deliver(&mut state, "m1", &session, delta("streamed"));
    assert_eq!(entries_with_role(&state, &session, Role::Assistant).len(), 2);
}

#[test]
fn alias_prefixed_ids_reach_the_bare_session() {
    let mut state = state();
    let (first, second) = two_sessions(&mut state);

    deliver(
        &mut state,
        "m1",
        &format!("codex-event-{first}"),
        agent_message("for first"),
    );
    assert_eq!(entries_with_role(&state, &first, Role::Assistant).len(), 1);
    assert!(messages(&state, &second).is_empty());

    deliver(&mut state, "m2", &second, agent_message("for second"));
    assert_eq!(entries_with_role(&state, &first, Role::Assistant).len(), 1);
    assert_eq!(entries_with_role(&state, &second, Role::Assistant).len(), 1);

    deliver(&mut state, "m3", "someone-else", agent_message("stray"));
    assert_eq!(messages(&state, &first).len(), 1);
    assert_eq!(messages(&state, &second).len(), 1);
}

#[test]
fn events_without_session_are_broadcast() {
    let mut state = state();
    let (first, second) = two_sessions(&mut state);
    runtime(
        &mut state,
        RuntimeAction::Inbound(Inbound::Structured(BackendEvent::new(
            "b1",
            None,
            agent_message("everyone"),
        ))),
    );
    assert_eq!(entries_with_role(&state, &first, Role::Assistant).len(), 1);
    assert_eq!(entries_with_role(&state, &second, Role::Assistant).len(), 1);
}

#[test]
fn backend_session_handle_is_an_alias() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver(
        &mut state,
        "s1",
        &session,
        EventMsg::SessionConfigured(SessionConfiguredEvent {
            session_id: "0199-backend".to_string(),
            model: None,
            rollout_path: Some("/tmp/r.jsonl".into()),
        }),
    );
    deliver(&mut state, "m1", "0199-backend", agent_message("via handle"));
    assert_eq!(entries_with_role(&state, &session, Role::Assistant).len(), 1);
}

#[test]
fn canonical_field_wins_over_synonym() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver_raw(
        &mut state,
        json!({
            "event_id": "r1",
            "sessionId": session,
            "type": "agent_message",
            "message": "canonical",
            "text": "fallback"
        }),
    );
    deliver_raw(
        &mut state,
        json!({
            "id": "r2",
            "session_id": session,
            "msg": { "type": "agent_message", "content": "from synonym" }
        }),
    );

    let contents: Vec<String> = entries_with_role(&state, &session, Role::Assistant)
        .into_iter()
        .map(|message| message.content)
        .collect();
    assert_eq!(contents, vec!["canonical".to_string(), "from synonym".to_string()]);
}

#[test]
fn malformed_raw_events_are_dropped() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver_raw(&mut state, json!({ "type": "agent_message", "message": "no id" }));
    deliver_raw(&mut state, json!({ "id": "x", "session_id": session }));
    deliver_raw(
        &mut state,
        json!({ "id": "y", "session_id": session, "type": "agent_message", "msg": 5 }),
    );
    assert!(messages(&state, &session).is_empty());
}

#[test]
fn unmounted_sessions_receive_nothing() {
    let mut state = state();
    let (first, second) = two_sessions(&mut state);
    user(
        &mut state,
        UserAction::SelectSession {
            session_id: first.clone(),
        },
    );
    assert!(!state.is_mounted(&second));
    deliver(&mut state, "m1", &second, agent_message("late"));
    assert!(messages(&state, &second).is_empty());
}
