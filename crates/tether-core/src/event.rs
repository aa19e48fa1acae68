use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// One event as delivered by the backend bridge.
///
/// `id` is the backend correlation id. It is the deduplication identity and,
/// for approval requests, the token the backend expects back with the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub msg: EventMsg,
}

impl BackendEvent {
    pub fn new(id: impl Into<String>, session_id: Option<&str>, msg: EventMsg) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.map(str::to_string),
            msg,
        }
    }

    pub fn kind(&self) -> &str {
        self.msg.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    SessionConfigured(SessionConfiguredEvent),
    #[serde(alias = "turn_started")]
    TaskStarted(TaskStartedEvent),
    #[serde(alias = "turn_complete")]
    TaskComplete(TaskCompleteEvent),
    AgentMessage(AgentMessageEvent),
    AgentMessageDelta(DeltaEvent),
    AgentReasoning(ReasoningEvent),
    AgentReasoningRawContent(ReasoningEvent),
    AgentReasoningDelta(DeltaEvent),
    AgentReasoningRawContentDelta(DeltaEvent),
    AgentReasoningSectionBreak(EmptyEvent),
    UserMessage(UserMessageEvent),
    PlanUpdate(PlanUpdateEvent),
    McpToolCallBegin(ToolCallBeginEvent),
    McpToolCallEnd(EmptyEvent),
    WebSearchBegin(WebSearchBeginEvent),
    WebSearchEnd(EmptyEvent),
    ExecCommandBegin(ExecCommandBeginEvent),
    ExecCommandOutputDelta(EmptyEvent),
    ExecCommandEnd(ExecCommandEndEvent),
    ExecApprovalRequest(ExecApprovalRequestEvent),
    PatchApprovalRequest(PatchApprovalRequestEvent),
    ApplyPatchApprovalRequest(ApplyPatchApprovalRequestEvent),
    PatchApplyBegin(EmptyEvent),
    PatchApplyEnd(EmptyEvent),
    Error(ErrorEvent),
    StreamError(ErrorEvent),
    TurnAborted(TurnAbortedEvent),
    TurnDiff(TurnDiffEvent),
    ShutdownComplete(EmptyEvent),
    TokenCount(EmptyEvent),
    BackgroundEvent(BackgroundEventMsg),
    /// A kind this client does not know yet. Never produced by serde; the
    /// normalizer builds it so the reducer can log and skip the event.
    #[serde(skip)]
    Unknown { kind: String },
}

impl EventMsg {
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionConfigured(_) => "session_configured",
            Self::TaskStarted(_) => "task_started",
            Self::TaskComplete(_) => "task_complete",
            Self::AgentMessage(_) => "agent_message",
            Self::AgentMessageDelta(_) => "agent_message_delta",
            Self::AgentReasoning(_) => "agent_reasoning",
            Self::AgentReasoningRawContent(_) => "agent_reasoning_raw_content",
            Self::AgentReasoningDelta(_) => "agent_reasoning_delta",
            Self::AgentReasoningRawContentDelta(_) => "agent_reasoning_raw_content_delta",
            Self::AgentReasoningSectionBreak(_) => "agent_reasoning_section_break",
            Self::UserMessage(_) => "user_message",
            Self::PlanUpdate(_) => "plan_update",
            Self::McpToolCallBegin(_) => "mcp_tool_call_begin",
            Self::McpToolCallEnd(_) => "mcp_tool_call_end",
            Self::WebSearchBegin(_) => "web_search_begin",
            Self::WebSearchEnd(_) => "web_search_end",
            Self::ExecCommandBegin(_) => "exec_command_begin",
            Self::ExecCommandOutputDelta(_) => "exec_command_output_delta",
            Self::ExecCommandEnd(_) => "exec_command_end",
            Self::ExecApprovalRequest(_) => "exec_approval_request",
            Self::PatchApprovalRequest(_) => "patch_approval_request",
            Self::ApplyPatchApprovalRequest(_) => "apply_patch_approval_request",
            Self::PatchApplyBegin(_) => "patch_apply_begin",
            Self::PatchApplyEnd(_) => "patch_apply_end",
            Self::Error(_) => "error",
            Self::StreamError(_) => "stream_error",
            Self::TurnAborted(_) => "turn_aborted",
            Self::TurnDiff(_) => "turn_diff",
            Self::ShutdownComplete(_) => "shutdown_complete",
            Self::TokenCount(_) => "token_count",
            Self::BackgroundEvent(_) => "background_event",
            Self::Unknown { kind } => kind.as_str(),
        }
    }

    /// High-frequency kinds whose effect is superseded by a later event in
    /// the same turn.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AgentMessageDelta(_)
                | Self::AgentReasoningDelta(_)
                | Self::AgentReasoningRawContentDelta(_)
                | Self::ExecCommandOutputDelta(_)
                | Self::TokenCount(_)
        )
    }
}

/// Payload for kinds whose content the transcript never reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyEvent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfiguredEvent {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStartedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_context_window: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleteEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessageEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningEvent {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessageEvent {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl StepStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub step: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUpdateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub plan: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBeginEvent {
    #[serde(default)]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchBeginEvent {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommandBeginEvent {
    #[serde(default)]
    pub call_id: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommandEndEvent {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecApprovalRequestEvent {
    #[serde(default)]
    pub call_id: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchApprovalRequestEvent {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileChange {
    Add {
        content: String,
    },
    Delete {
        #[serde(default)]
        content: String,
    },
    Update {
        unified_diff: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        move_path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPatchApprovalRequestEvent {
    #[serde(default)]
    pub call_id: String,
    pub changes: BTreeMap<PathBuf, FileChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAbortedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnDiffEvent {
    pub unified_diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundEventMsg {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::BackendEvent;
    use super::EventMsg;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn structured_event_parses_with_session_id() {
        let event: BackendEvent = serde_json::from_value(json!({
            "id": "1",
            "session_id": "s1",
            "msg": { "type": "agent_message_delta", "delta": "Hel" }
        }))
        .expect("parse");
        assert_eq!(event.kind(), "agent_message_delta");
        assert_eq!(event.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn only_streaming_noise_is_transient() {
        let parse = |msg: serde_json::Value| -> EventMsg {
            serde_json::from_value(msg).expect("parse")
        };
        assert!(parse(json!({ "type": "agent_message_delta", "delta": "a" })).is_transient());
        assert!(parse(json!({ "type": "agent_reasoning_delta", "delta": "b" })).is_transient());
        assert!(parse(json!({ "type": "token_count" })).is_transient());
        assert!(!parse(json!({ "type": "agent_message", "message": "done" })).is_transient());
        assert!(!parse(json!({ "type": "task_complete" })).is_transient());
    }

    #[test]
    fn turn_started_alias_maps_to_task_started() {
        let event: BackendEvent = serde_json::from_value(json!({
            "id": "2",
            "msg": { "type": "turn_started" }
        }))
        .expect("parse");
        assert!(matches!(event.msg, EventMsg::TaskStarted(_)));
        assert_eq!(event.kind(), "task_started");
    }

    #[test]
    fn ignored_payload_fields_do_not_fail_parsing() {
        let event: BackendEvent = serde_json::from_value(json!({
            "id": "3",
            "msg": { "type": "token_count", "input_tokens": 12, "output_tokens": 40 }
        }))
        .expect("parse");
        assert_eq!(event.kind(), "token_count");
    }

    #[test]
    fn unknown_kind_is_rejected_by_structured_parsing() {
        let parsed = serde_json::from_value::<BackendEvent>(json!({
            "id": "4",
            "msg": { "type": "collab_agent_spawn_begin" }
        }));
        assert!(parsed.is_err());
    }
}
