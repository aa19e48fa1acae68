use super::ChatEffect;
use crate::actions::BackendCommand;
use crate::approval::apply_patch_summary;
use crate::approval::exec_summary;
use crate::approval::fenced;
use crate::approval::patch_summary;
use crate::approval::ApprovalWorkflow;
use crate::approval::PendingApproval;
use crate::config::ToolAllowList;
use crate::conversation::ConversationStore;
use crate::event::BackendEvent;
use crate::event::EventMsg;
use crate::event::ExecCommandBeginEvent;
use crate::event::ExecCommandEndEvent;
use crate::event::ToolCallBeginEvent;
use crate::state::ApprovalKind;
use crate::state::ApprovalRequest;
use crate::state::Message;
use crate::state::MessageType;
use crate::state::PlanPayload;
use crate::state::Role;
use crate::stream::CommitPolicy;
use crate::stream::StreamController;
use crate::stream::StreamSink;

/// Shared state a session reducer writes into while handling one event.
pub struct ReduceContext<'a> {
    pub store: &'a mut ConversationStore,
    pub approvals: &'a mut ApprovalWorkflow,
    pub tools: &'a ToolAllowList,
}

/// Stream sink that writes straight into a session transcript.
pub struct TranscriptSink<'a> {
    store: &'a mut ConversationStore,
    session_id: &'a str,
}

impl<'a> TranscriptSink<'a> {
    pub fn new(store: &'a mut ConversationStore, session_id: &'a str) -> Self {
        Self { store, session_id }
    }
}

impl StreamSink for TranscriptSink<'_> {
    fn show(&mut self, target: &str, content: &str) {
        let found = self.store.update_message(self.session_id, target, |message| {
            message.content = content.to_string();
        });
        if !found {
            tracing::warn!(target, "stream target missing from transcript");
        }
    }

    fn end_stream(&mut self, target: &str) {
        self.store.update_message(self.session_id, target, |message| {
            message.is_streaming = false;
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExecTracking {
    message_id: String,
    command: String,
}

/// Turns one session's event stream into transcript mutations.
///
/// Lives as long as the session view is mounted; everything here is transient.
#[derive(Debug, Clone)]
pub struct SessionEventReducer {
    session_id: String,
    stream: StreamController,
    exec: Option<ExecTracking>,
    last_turn_diff: Option<String>,
    turn_streamed: bool,
    backend_session_id: Option<String>,
}

impl SessionEventReducer {
    pub fn new(
        session_id: impl Into<String>,
        backend_session_id: Option<String>,
        policy: CommitPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stream: StreamController::new(policy),
            exec: None,
            last_turn_diff: None,
            turn_streamed: false,
            backend_session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stream(&self) -> &StreamController {
        &self.stream
    }

    pub fn backend_session_id(&self) -> Option<&str> {
        self.backend_session_id.as_deref()
    }

    pub fn exec_target(&self) -> Option<&str> {
        self.exec.as_ref().map(|exec| exec.message_id.as_str())
    }

    /// Drops the open stream and any dangling streaming flag without touching
    /// entry contents.
    pub fn abandon_stream(&mut self, store: &mut ConversationStore) {
        self.stream.clear_all();
        store.settle_streaming(&self.session_id);
    }

    /// Marks the start of a user turn for backends that skip `task_started`.
    pub fn start_turn(&mut self) {
        self.turn_streamed = false;
    }

    pub fn handle(
        &mut self,
        event: &BackendEvent,
        ctx: &mut ReduceContext<'_>,
    ) -> Vec<ChatEffect> {
        let owned_id = self.session_id.clone();
        let session_id = owned_id.as_str();
        match &event.msg {
            EventMsg::SessionConfigured(configured) => {
                self.backend_session_id = Some(configured.session_id.clone());
                let rollout_path = configured.rollout_path.clone();
                let has_rollout = rollout_path.is_some();
                ctx.store.update_resume(session_id, |resume| {
                    resume.backend_session_id = Some(configured.session_id.clone());
                    if rollout_path.is_some() {
                        resume.rollout_path = rollout_path;
                    }
                });
                tracing::info!(
                    session_id,
                    backend_session_id = configured.session_id.as_str(),
                    "backend session configured"
                );
                if has_rollout {
                    return Vec::new();
                }
                vec![ChatEffect::Dispatch(BackendCommand::ResolveResumePath {
                    session_id: session_id.to_string(),
                    backend_session_id: configured.session_id.clone(),
                })]
            }
            EventMsg::TaskStarted(_) => {
                ctx.store.set_loading(session_id, true);
                self.abandon_stream(ctx.store);
                self.turn_streamed = false;
                Vec::new()
            }
            EventMsg::TaskComplete(_) => {
                ctx.store.set_loading(session_id, false);
                self.finalize_stream(true, ctx.store);
                self.turn_streamed = false;
                Vec::new()
            }
            EventMsg::AgentMessage(agent) => {
                self.complete_agent_message(&agent.message, ctx.store);
                Vec::new()
            }
            EventMsg::AgentMessageDelta(delta) => {
                if !self.stream.is_streaming() {
                    ctx.store.settle_streaming(session_id);
                    let entry = Message::synthetic(Role::Assistant, "").streaming();
                    let target = entry.id.clone();
                    ctx.store.append_message(session_id, entry);
                    self.stream.begin(target);
                    self.turn_streamed = true;
                }
                let mut sink = TranscriptSink::new(ctx.store, session_id);
                self.stream.push_and_maybe_commit(&delta.delta, &mut sink);
                Vec::new()
            }
            EventMsg::AgentReasoning(reasoning) | EventMsg::AgentReasoningRawContent(reasoning) => {
                if reasoning.text.trim().is_empty() {
                    tracing::debug!(session_id, "empty reasoning suppressed");
                } else {
                    ctx.store.append_message(
                        session_id,
                        Message::system(reasoning.text.clone()).with_type(MessageType::Reasoning),
                    );
                }
                Vec::new()
            }
            EventMsg::PlanUpdate(plan) => {
                let mut entry = Message::system("").with_type(MessageType::PlanUpdate);
                entry.plan = Some(PlanPayload {
                    explanation: plan.explanation.clone(),
                    steps: plan.plan.clone(),
                });
                ctx.store.append_message(session_id, entry);
                Vec::new()
            }
            EventMsg::McpToolCallBegin(call) => {
                if ctx.tools.allows(&call.tool) {
                    ctx.store.append_message(session_id, tool_call_entry(call));
                } else {
                    tracing::debug!(session_id, tool = call.tool.as_str(), "tool call suppressed");
                }
                Vec::new()
            }
            EventMsg::WebSearchBegin(search) => {
                ctx.store.append_message(
                    session_id,
                    Message::system(search.query.clone())
                        .with_title("web_search")
                        .with_type(MessageType::ToolCall),
                );
                Vec::new()
            }
            EventMsg::ExecCommandBegin(begin) => {
                self.begin_exec(begin, ctx.store);
                Vec::new()
            }
            EventMsg::ExecCommandEnd(end) => {
                self.end_exec(end, ctx.store);
                Vec::new()
            }
            EventMsg::ExecApprovalRequest(request) => {
                self.request_approval(
                    event,
                    ApprovalKind::Exec,
                    &request.call_id,
                    exec_summary(request),
                    ctx,
                );
                Vec::new()
            }
            EventMsg::PatchApprovalRequest(request) => {
                self.request_approval(
                    event,
                    ApprovalKind::Patch,
                    &request.call_id,
                    patch_summary(request),
                    ctx,
                );
                Vec::new()
            }
            EventMsg::ApplyPatchApprovalRequest(request) => {
                self.request_approval(
                    event,
                    ApprovalKind::ApplyPatch,
                    &request.call_id,
                    apply_patch_summary(request),
                    ctx,
                );
                Vec::new()
            }
            EventMsg::Error(error) | EventMsg::StreamError(error) => {
                self.finalize_stream(true, ctx.store);
                tracing::warn!(session_id, message = error.message.as_str(), "backend error");
                ctx.store.append_message(
                    session_id,
                    Message::system(error.message.clone()).with_title("Error"),
                );
                ctx.store.set_loading(session_id, false);
                Vec::new()
            }
            EventMsg::TurnAborted(aborted) => {
                self.finalize_stream(true, ctx.store);
                self.exec = None;
                let content = match aborted.reason.as_deref().map(str::trim) {
                    Some(reason) if !reason.is_empty() => format!("Turn aborted: {reason}"),
                    _ => "Turn aborted".to_string(),
                };
                ctx.store.append_message(session_id, Message::system(content));
                ctx.store.set_loading(session_id, false);
                vec![ChatEffect::StopStreaming {
                    session_id: session_id.to_string(),
                }]
            }
            EventMsg::TurnDiff(diff) => {
                if self.last_turn_diff.as_deref() == Some(diff.unified_diff.as_str()) {
                    tracing::trace!(session_id, "unchanged turn diff suppressed");
                    return Vec::new();
                }
                self.last_turn_diff = Some(diff.unified_diff.clone());
                ctx.store.publish_turn_diff(session_id, &diff.unified_diff);
                vec![ChatEffect::TurnDiffUpdated {
                    session_id: session_id.to_string(),
                }]
            }
            EventMsg::ShutdownComplete(_) => {
                self.abandon_stream(ctx.store);
                self.exec = None;
                tracing::info!(session_id, "backend shut down");
                Vec::new()
            }
            EventMsg::AgentReasoningDelta(_)
            | EventMsg::AgentReasoningRawContentDelta(_)
            | EventMsg::AgentReasoningSectionBreak(_)
            | EventMsg::McpToolCallEnd(_)
            | EventMsg::WebSearchEnd(_)
            | EventMsg::ExecCommandOutputDelta(_)
            | EventMsg::PatchApplyBegin(_)
            | EventMsg::PatchApplyEnd(_)
            | EventMsg::UserMessage(_) => {
                tracing::debug!(session_id, kind = event.kind(), "event suppressed");
                Vec::new()
            }
            EventMsg::TokenCount(_) | EventMsg::BackgroundEvent(_) => {
                tracing::trace!(session_id, kind = event.kind(), "event ignored");
                Vec::new()
            }
            EventMsg::Unknown { kind } => {
                tracing::debug!(session_id, kind = kind.as_str(), "unrecognized event kind");
                Vec::new()
            }
        }
    }

    fn finalize_stream(&mut self, commit: bool, store: &mut ConversationStore) -> Option<String> {
        let mut sink = TranscriptSink::new(store, &self.session_id);
        self.stream.finalize(commit, &mut sink)
    }

    fn complete_agent_message(&mut self, text: &str, store: &mut ConversationStore) {
        if let Some(target) = self.finalize_stream(false, store) {
            store.update_message(&self.session_id, &target, |message| {
                message.content = text.to_string();
                message.is_streaming = false;
            });
            return;
        }
        if self.turn_streamed {
            tracing::debug!(
                session_id = self.session_id.as_str(),
                "complete message already streamed this turn"
            );
            return;
        }
        store.append_message(
            &self.session_id,
            Message::synthetic(Role::Assistant, text.to_string()),
        );
    }

    fn begin_exec(&mut self, begin: &ExecCommandBeginEvent, store: &mut ConversationStore) {
        let command = begin.command.join(" ");
        let entry = Message::system(begin.cwd.display().to_string())
            .with_title(command.clone())
            .with_type(MessageType::ExecCommand);
        if let Some(previous) = self.exec.as_ref() {
            tracing::debug!(
                session_id = self.session_id.as_str(),
                previous = previous.message_id.as_str(),
                "exec begin replaces an unfinished command"
            );
        }
        self.exec = Some(ExecTracking {
            message_id: entry.id.clone(),
            command,
        });
        store.append_message(&self.session_id, entry);
    }

    fn end_exec(&mut self, end: &ExecCommandEndEvent, store: &mut ConversationStore) {
        let Some(exec) = self.exec.take() else {
            tracing::warn!(
                session_id = self.session_id.as_str(),
                call_id = end.call_id.as_str(),
                "exec end without a tracked begin; ignoring"
            );
            return;
        };
        let title = if end.exit_code == 0 {
            format!("✓ {}", exec.command)
        } else {
            format!("✗ {} (exit {})", exec.command, end.exit_code)
        };
        let mut content = fenced("", &end.stdout);
        if !end.stderr.trim().is_empty() {
            content.push_str("\n\n");
            content.push_str(&fenced("", &end.stderr));
        }
        store.update_message(&self.session_id, &exec.message_id, |message| {
            message.title = Some(title);
            message.content = content;
        });
    }

    fn request_approval(
        &mut self,
        event: &BackendEvent,
        kind: ApprovalKind,
        call_id: &str,
        summary: String,
        ctx: &mut ReduceContext<'_>,
    ) {
        let mut entry = Message::new(event.id.clone(), Role::Approval, summary.clone());
        entry.approval_request = Some(ApprovalRequest {
            kind,
            summary: summary.clone(),
            resolution: None,
        });
        ctx.store.append_message(&self.session_id, entry);
        ctx.approvals.register(PendingApproval {
            approval_id: event.id.clone(),
            session_id: self.session_id.clone(),
            kind,
            call_id: call_id.to_string(),
            summary,
        });
    }
}

fn tool_call_entry(call: &ToolCallBeginEvent) -> Message {
    let title = match call.server.as_deref() {
        Some(server) if !server.is_empty() => format!("{server}.{}", call.tool),
        _ => call.tool.clone(),
    };
    let content = call
        .arguments
        .as_ref()
        .filter(|arguments| !arguments.is_null())
        .map(|arguments| {
            serde_json::to_string_pretty(arguments).unwrap_or_else(|_| arguments.to_string())
        })
        .unwrap_or_default();
    Message::system(content)
        .with_title(title)
        .with_type(MessageType::ToolCall)
}
