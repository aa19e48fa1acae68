use std::path::PathBuf;

use tether_core::ApprovalDecision;
use tether_core::ApprovalKind;
use tether_core::BackendCommand;

use super::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// The backend operations a chat frontend drives.
pub trait BackendClient {
    fn send_user_message(
        &mut self,
        session_id: &str,
        text: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> Result<(), BackendError>;

    fn respond_approval(
        &mut self,
        session_id: &str,
        approval_id: &str,
        kind: ApprovalKind,
        decision: ApprovalDecision,
    ) -> Result<(), BackendError>;

    fn interrupt(&mut self, session_id: &str) -> Result<(), BackendError>;

    fn close_session(&mut self, session_id: &str) -> Result<(), BackendError>;
}

/// Executes a command against `client`. Resume-path lookups are filesystem
/// work, not backend traffic, and are rejected here.
pub fn dispatch(
    client: &mut dyn BackendClient,
    command: &BackendCommand,
) -> Result<(), BackendError> {
    match command {
        BackendCommand::SendUserMessage {
            session_id,
            text,
            model,
            provider,
        } => client.send_user_message(session_id, text, model.as_deref(), provider.as_deref()),
        BackendCommand::RespondApproval {
            session_id,
            approval_id,
            kind,
            decision,
        } => client.respond_approval(session_id, approval_id, *kind, *decision),
        BackendCommand::Interrupt { session_id } => client.interrupt(session_id),
        BackendCommand::CloseSession { session_id } => client.close_session(session_id),
        BackendCommand::ResolveResumePath { .. } => {
            Err(BackendError::Unsupported(command.kind().label()))
        }
    }
}

#[cfg(test)]
mod tests {
    use tether_core::ApprovalDecision;
    use tether_core::ApprovalKind;
    use tether_core::BackendCommand;

    use super::dispatch;
    use super::BackendClient;
    use crate::error::BackendError;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingClient {
        calls: Vec<String>,
    }

    impl BackendClient for RecordingClient {
        fn send_user_message(
            &mut self,
            session_id: &str,
            text: &str,
            model: Option<&str>,
            _provider: Option<&str>,
        ) -> Result<(), BackendError> {
            self.calls
                .push(format!("send {session_id} {text} {}", model.unwrap_or("-")));
            Ok(())
        }

        fn respond_approval(
            &mut self,
            session_id: &str,
            approval_id: &str,
            kind: ApprovalKind,
            decision: ApprovalDecision,
        ) -> Result<(), BackendError> {
            self.calls.push(format!(
                "approve {session_id} {approval_id} {} {}",
                kind.label(),
                decision.label()
            ));
            Ok(())
        }

        fn interrupt(&mut self, session_id: &str) -> Result<(), BackendError> {
            Err(BackendError::NotRunning(session_id.to_string()))
        }

        fn close_session(&mut self, session_id: &str) -> Result<(), BackendError> {
            self.calls.push(format!("close {session_id}"));
            Ok(())
        }
    }

    #[test]
    fn dispatch_routes_each_command() {
        let mut client = RecordingClient::default();
        dispatch(
            &mut client,
            &BackendCommand::SendUserMessage {
                session_id: "s1".to_string(),
                text: "hi".to_string(),
                model: None,
                provider: None,
            },
        )
        .expect("send");
        dispatch(
            &mut client,
            &BackendCommand::RespondApproval {
                session_id: "s1".to_string(),
                approval_id: "evt-1".to_string(),
                kind: ApprovalKind::Patch,
                decision: ApprovalDecision::Approved,
            },
        )
        .expect("approve");
        dispatch(
            &mut client,
            &BackendCommand::CloseSession {
                session_id: "s1".to_string(),
            },
        )
        .expect("close");
        assert_eq!(
            client.calls,
            vec![
                "send s1 hi -".to_string(),
                "approve s1 evt-1 patch approved".to_string(),
                "close s1".to_string()
            ]
        );

        let interrupt = dispatch(
            &mut client,
            &BackendCommand::Interrupt {
                session_id: "s1".to_string(),
            },
        );
        assert!(matches!(interrupt, Err(BackendError::NotRunning(_))));

        let lookup = dispatch(
            &mut client,
            &BackendCommand::ResolveResumePath {
                session_id: "s1".to_string(),
                backend_session_id: "b".to_string(),
            },
        );
        assert!(matches!(lookup, Err(BackendError::Unsupported(_))));
    }
}
