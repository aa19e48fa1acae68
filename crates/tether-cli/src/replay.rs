use tether_core::config::Config;
use tether_core::reduce;
use tether_core::subscription::Inbound;
use tether_core::ChatAction;
use tether_core::ChatState;
use tether_core::RecordedEvent;
use tether_core::RuntimeAction;
use tether_core::Session;
use tether_core::TetherError;

/// Rebuilds a session transcript offline by pushing recorded backend events
/// through a freshly mounted pipeline. Backend commands the reducer asks for
/// are not executed.
pub fn replay_session(
    config: Config,
    session_id: &str,
    records: &[RecordedEvent],
) -> Result<Session, TetherError> {
    let mut state = ChatState::new(config, None)?;
    state.store.insert_session(Session::new(session_id, None));
    state.store.set_current_session(Some(session_id));
    state.mount(session_id);

    let mut skipped_commands = 0usize;
    for record in records {
        let inbound = Inbound::from_value(record.raw.clone()).with_default_session(session_id);
        let effects = reduce(
            &mut state,
            ChatAction::Runtime(RuntimeAction::Inbound(inbound)),
        );
        skipped_commands += effects.len();
    }
    state.unmount(session_id);
    tracing::info!(
        session_id,
        events = records.len(),
        skipped_commands,
        "replay finished"
    );
    state.store.require_session(session_id).cloned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use serde_json::Value;
    use tether_core::RecordedEvent;
    use tether_core::Role;

    use super::replay_session;
    use pretty_assertions::assert_eq;

    fn record(seq: u64, raw: Value) -> RecordedEvent {
        RecordedEvent {
            seq,
            ts_ms: 0,
            session_id: "s1".to_string(),
            raw,
        }
    }

    #[test]
    fn replay_assembles_streamed_answer_once() {
        let records = vec![
            record(1, json!({ "id": "0#1", "msg": { "type": "task_started" } })),
            record(
                2,
                json!({ "id": "0#2", "msg": { "type": "agent_message_delta", "delta": "Hi " } }),
            ),
            record(
                3,
                json!({ "id": "0#3", "msg": { "type": "agent_message_delta", "delta": "there" } }),
            ),
            record(
                4,
                json!({ "id": "0#3", "msg": { "type": "agent_message_delta", "delta": "there" } }),
            ),
            record(5, json!({ "id": "0#4", "msg": { "type": "task_complete" } })),
        ];

        let session = replay_session(Default::default(), "s1", &records).expect("replay");
        let assistant: Vec<&str> = session
            .messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(assistant, vec!["Hi there"]);
        assert!(session.messages.iter().all(|message| !message.is_streaming));
        assert!(!session.loading);
    }

    #[test]
    fn events_for_other_sessions_are_ignored() {
        let records = vec![record(
            1,
            json!({
                "id": "1",
                "session_id": "someone-else",
                "msg": { "type": "agent_message", "message": "not ours" }
            }),
        )];
        let session = replay_session(Default::default(), "s1", &records).expect("replay");
        assert!(session.messages.is_empty());
    }
}
