use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::state::ApprovalDecision;
use super::state::ApprovalKind;
use super::subscription::Inbound;

#[derive(Debug, Clone)]
pub enum ChatAction {
    User(UserAction),
    Runtime(RuntimeAction),
}

#[derive(Debug, Clone)]
pub enum UserAction {
    SendMessage {
        text: String,
    },
    EditAndResend {
        session_id: String,
        message_id: String,
        text: String,
    },
    NewSession,
    SelectSession {
        session_id: String,
    },
    RenameSession {
        session_id: String,
        title: String,
    },
    DeleteSession {
        session_id: String,
    },
    DecideApproval {
        approval_id: String,
        decision: ApprovalDecision,
    },
    Interrupt,
}

#[derive(Debug, Clone)]
pub enum RuntimeAction {
    Inbound(Inbound),
    ResumePathResolved {
        session_id: String,
        path: Option<PathBuf>,
    },
    CommandFailed {
        session_id: String,
        command: CommandKind,
        message: String,
    },
}

/// Requests the frontend makes of the backend. Executed outside the reducer;
/// failures come back as [`RuntimeAction::CommandFailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BackendCommand {
    SendUserMessage {
        session_id: String,
        text: String,
        model: Option<String>,
        provider: Option<String>,
    },
    ResolveResumePath {
        session_id: String,
        backend_session_id: String,
    },
    RespondApproval {
        session_id: String,
        approval_id: String,
        kind: ApprovalKind,
        decision: ApprovalDecision,
    },
    Interrupt {
        session_id: String,
    },
    /// Stops the backend process serving a deleted session.
    CloseSession {
        session_id: String,
    },
}

impl BackendCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SendUserMessage { .. } => CommandKind::SendUserMessage,
            Self::ResolveResumePath { .. } => CommandKind::ResolveResumePath,
            Self::RespondApproval { .. } => CommandKind::RespondApproval,
            Self::Interrupt { .. } => CommandKind::Interrupt,
            Self::CloseSession { .. } => CommandKind::CloseSession,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::SendUserMessage { session_id, .. }
            | Self::ResolveResumePath { session_id, .. }
            | Self::RespondApproval { session_id, .. }
            | Self::Interrupt { session_id }
            | Self::CloseSession { session_id } => session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SendUserMessage,
    ResolveResumePath,
    RespondApproval,
    Interrupt,
    CloseSession,
}

impl CommandKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::SendUserMessage => "send message",
            Self::ResolveResumePath => "resolve resume path",
            Self::RespondApproval => "send approval",
            Self::Interrupt => "interrupt",
            Self::CloseSession => "close session",
        }
    }

    /// Whether a failure of this command is shown in the transcript.
    pub fn surfaces_failure(self) -> bool {
        !matches!(self, Self::ResolveResumePath | Self::CloseSession)
    }
}
