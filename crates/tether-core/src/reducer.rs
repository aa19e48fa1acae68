mod session;

pub use session::ReduceContext;
pub use session::SessionEventReducer;
pub use session::TranscriptSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEffect {
    Dispatch(BackendCommand),
    /// A turn was aborted; any frontend-side streaming indicator should stop.
    StopStreaming {
        session_id: String,
    },
    /// A new turn diff was published to the session's ephemeral slot.
    TurnDiffUpdated {
        session_id: String,
    },
}

use super::actions::BackendCommand;
use super::actions::ChatAction;
use super::actions::RuntimeAction;
use super::actions::UserAction;
use super::state::ChatState;
use super::state::Message;

pub fn reduce(state: &mut ChatState, action: ChatAction) -> Vec<ChatEffect> {
    match action {
        ChatAction::User(user) => reduce_user(state, user),
        ChatAction::Runtime(runtime) => reduce_runtime(state, runtime),
    }
}

fn reduce_user(state: &mut ChatState, action: UserAction) -> Vec<ChatEffect> {
    match action {
        UserAction::SendMessage { text } => {
            let session_id = state.store.current_session_id().map(str::to_string);
            send_message(state, session_id, text)
        }
        UserAction::EditAndResend {
            session_id,
            message_id,
            text,
        } => {
            if text.trim().is_empty() {
                return Vec::new();
            }
            if state.store.truncate_from(&session_id, &message_id) == 0 {
                tracing::warn!(
                    session_id = session_id.as_str(),
                    message_id = message_id.as_str(),
                    "edit target not found"
                );
                return Vec::new();
            }
            if let Some(subscription) = state.subscriptions.get_mut(&session_id) {
                subscription.reducer_mut().abandon_stream(&mut state.store);
            }
            state.store.set_current_session(Some(&session_id));
            send_message(state, Some(session_id), text)
        }
        UserAction::NewSession => {
            let session_id = state.store.create_session(state.project.clone());
            state.store.set_current_session(Some(&session_id));
            state.mount(&session_id);
            state.unmount_all_except(&session_id);
            Vec::new()
        }
        UserAction::SelectSession { session_id } => {
            if !state.store.set_current_session(Some(&session_id)) {
                tracing::warn!(session_id = session_id.as_str(), "select of unknown session");
                return Vec::new();
            }
            state.mount(&session_id);
            state.unmount_all_except(&session_id);
            Vec::new()
        }
        UserAction::RenameSession { session_id, title } => {
            if !state.store.rename_session(&session_id, &title) {
                tracing::warn!(session_id = session_id.as_str(), "rename rejected");
            }
            Vec::new()
        }
        UserAction::DeleteSession { session_id } => {
            state.unmount(&session_id);
            let dropped = state.approvals.drop_session(&session_id);
            if !state.store.delete_session(&session_id) {
                return Vec::new();
            }
            tracing::info!(
                session_id = session_id.as_str(),
                dropped_approvals = dropped,
                "session deleted"
            );
            vec![ChatEffect::Dispatch(BackendCommand::CloseSession { session_id })]
        }
        UserAction::DecideApproval {
            approval_id,
            decision,
        } => state
            .approvals
            .decide(&approval_id, decision, &mut state.store)
            .map(ChatEffect::Dispatch)
            .into_iter()
            .collect(),
        UserAction::Interrupt => match state.store.current_session_id() {
            Some(session_id) => vec![ChatEffect::Dispatch(BackendCommand::Interrupt {
                session_id: session_id.to_string(),
            })],
            None => Vec::new(),
        },
    }
}

fn send_message(
    state: &mut ChatState,
    session_id: Option<String>,
    text: String,
) -> Vec<ChatEffect> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let session_id = match session_id.filter(|id| state.store.session(id).is_some()) {
        Some(id) => id,
        None => {
            let id = state.store.create_session(state.project.clone());
            state.store.set_current_session(Some(&id));
            id
        }
    };
    state
        .store
        .append_message(&session_id, Message::user(text.clone()));
    state.store.set_loading(&session_id, true);
    state.mount(&session_id);
    if let Some(subscription) = state.subscriptions.get_mut(&session_id) {
        subscription.reducer_mut().start_turn();
    }
    vec![ChatEffect::Dispatch(BackendCommand::SendUserMessage {
        session_id,
        text,
        model: state.config.model.default_model.clone(),
        provider: state.config.model.default_provider.clone(),
    })]
}

fn reduce_runtime(state: &mut ChatState, action: RuntimeAction) -> Vec<ChatEffect> {
    match action {
        RuntimeAction::Inbound(inbound) => {
            let Some(event) = inbound.into_event() else {
                return Vec::new();
            };
            let mut ctx = ReduceContext {
                store: &mut state.store,
                approvals: &mut state.approvals,
                tools: &state.tools,
            };
            let mut effects = Vec::new();
            let mut delivered = false;
            for subscription in state.subscriptions.values_mut() {
                if subscription.accepts(&event) {
                    delivered = true;
                    effects.extend(subscription.deliver(&event, &mut ctx));
                }
            }
            if !delivered {
                tracing::debug!(
                    id = event.id.as_str(),
                    kind = event.kind(),
                    session_id = ?event.session_id,
                    "no mounted session for event"
                );
            }
            effects
        }
        RuntimeAction::ResumePathResolved { session_id, path } => {
            match path {
                Some(path) => {
                    tracing::debug!(
                        session_id = session_id.as_str(),
                        path = %path.display(),
                        "resume path resolved"
                    );
                    state
                        .store
                        .update_resume(&session_id, |resume| resume.rollout_path = Some(path));
                }
                None => {
                    tracing::debug!(session_id = session_id.as_str(), "resume path not found");
                }
            }
            Vec::new()
        }
        RuntimeAction::CommandFailed {
            session_id,
            command,
            message,
        } => {
            tracing::warn!(
                session_id = session_id.as_str(),
                command = command.label(),
                message = message.as_str(),
                "backend command failed"
            );
            if command.surfaces_failure() {
                state.store.append_message(
                    &session_id,
                    Message::system(format!("Failed to {}: {message}", command.label()))
                        .with_title("Error"),
                );
                state.store.set_loading(&session_id, false);
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests;
