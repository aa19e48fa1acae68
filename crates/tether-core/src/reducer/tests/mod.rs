use std::path::PathBuf;

pub(super) use super::reduce;
pub(super) use crate::actions::BackendCommand;
pub(super) use crate::actions::ChatAction;
pub(super) use crate::actions::CommandKind;
pub(super) use crate::actions::RuntimeAction;
pub(super) use crate::actions::UserAction;
pub(super) use crate::config::Config;
pub(super) use crate::event::BackendEvent;
pub(super) use crate::event::DeltaEvent;
pub(super) use crate::event::EmptyEvent;
pub(super) use crate::event::EventMsg;
pub(super) use crate::reducer::ChatEffect;
pub(super) use crate::state::ApprovalDecision;
pub(super) use crate::state::ChatState;
pub(super) use crate::state::Message;
pub(super) use crate::state::MessageType;
pub(super) use crate::state::Role;
pub(super) use crate::subscription::Inbound;

mod exec_commands;
mod routing;

fn state() -> ChatState {
    ChatState::new(Config::default(), Some(PathBuf::from("/repo"))).expect("state")
}

/// Creates, selects and mounts a fresh session; returns its id.
fn open_session(state: &mut ChatState) -> String {
    let effects = reduce(state, ChatAction::User(UserAction::NewSession));
    assert!(effects.is_empty());
    state
        .store
        .current_session_id()
        .expect("current session")
        .to_string()
}

fn user(state: &mut ChatState, action: UserAction) -> Vec<ChatEffect> {
    reduce(state, ChatAction::User(action))
}

fn runtime(state: &mut ChatState, action: RuntimeAction) -> Vec<ChatEffect> {
    reduce(state, ChatAction::Runtime(action))
}

fn deliver(state: &mut ChatState, id: &str, session_id: &str, msg: EventMsg) -> Vec<ChatEffect> {
    runtime(
        state,
        RuntimeAction::Inbound(Inbound::Structured(BackendEvent::new(
            id,
            Some(session_id),
            msg,
        ))),
    )
}

fn deliver_raw(state: &mut ChatState, raw: serde_json::Value) -> Vec<ChatEffect> {
    runtime(state, RuntimeAction::Inbound(Inbound::Raw(raw)))
}

fn delta(text: &str) -> EventMsg {
    EventMsg::AgentMessageDelta(DeltaEvent {
        delta: text.to_string(),
    })
}

fn task_started() -> EventMsg {
    EventMsg::TaskStarted(Default::default())
}

fn task_complete() -> EventMsg {
    EventMsg::TaskComplete(Default::default())
}

fn messages(state: &ChatState, session_id: &str) -> Vec<Message> {
    state
        .store
        .session(session_id)
        .map(|session| session.messages.clone())
        .unwrap_or_default()
}

fn entries_with_role(state: &ChatState, session_id: &str, role: Role) -> Vec<Message> {
    messages(state, session_id)
        .into_iter()
        .filter(|message| message.role == role)
        .collect()
}

fn is_streaming(state: &ChatState, session_id: &str) -> bool {
    state
        .subscriptions
        .get(session_id)
        .is_some_and(|subscription| subscription.reducer().stream().is_streaming())
}

fn assert_single_streaming_flag(state: &ChatState, session_id: &str) {
    let flagged = messages(state, session_id)
        .iter()
        .filter(|message| message.is_streaming)
        .count();
    assert!(flagged <= 1, "{flagged} entries flagged as streaming");
}
