use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::approval::ApprovalWorkflow;
use super::config::Config;
use super::config::ToolAllowList;
use super::conversation::ConversationStore;
use super::error::TetherError;
use super::event::PlanItem;
use super::subscription::EventSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Approval,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Approval => "approval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    PlanUpdate,
    ToolCall,
    ExecCommand,
    Reasoning,
}

impl MessageType {
    pub fn label(self) -> &'static str {
        match self {
            Self::PlanUpdate => "plan_update",
            Self::ToolCall => "tool_call",
            Self::ExecCommand => "exec_command",
            Self::Reasoning => "reasoning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub explanation: Option<String>,
    pub steps: Vec<PlanItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Exec,
    Patch,
    ApplyPatch,
}

impl ApprovalKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Exec => "execute",
            Self::Patch => "patch",
            Self::ApplyPatch => "apply_patch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

impl ApprovalDecision {
    pub fn label(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub kind: ApprovalKind,
    pub summary: String,
    #[serde(default)]
    pub resolution: Option<ApprovalDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<ApprovalRequest>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            title: None,
            timestamp: Utc::now(),
            is_streaming: false,
            message_type: None,
            plan: None,
            approval_request: None,
        }
    }

    /// A message with a freshly generated id, for entries that do not mirror
    /// a backend event.
    pub fn synthetic(role: Role, content: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), role, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::synthetic(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::synthetic(Role::System, content)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.is_streaming = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_locked: bool,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(skip)]
    pub loading: bool,
    #[serde(default)]
    pub resume: ResumeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const UNTITLED_SESSION: &str = "New chat";

impl Session {
    pub fn new(id: impl Into<String>, project_path: Option<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            title_locked: false,
            project_path,
            messages: Vec::new(),
            loading: false,
            resume: ResumeMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED_SESSION)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.is_streaming)
    }
}

/// Everything the chat frontend holds: the persisted conversation store plus
/// the transient per-mount pipeline state.
#[derive(Debug)]
pub struct ChatState {
    pub config: Config,
    pub project: Option<PathBuf>,
    pub store: ConversationStore,
    pub approvals: ApprovalWorkflow,
    pub subscriptions: BTreeMap<String, EventSubscription>,
    pub tools: ToolAllowList,
}

impl ChatState {
    pub fn new(config: Config, project: Option<PathBuf>) -> Result<Self, TetherError> {
        let tools = ToolAllowList::new(&config.pipeline.tool_allow_list)?;
        Ok(Self {
            config,
            project,
            store: ConversationStore::default(),
            approvals: ApprovalWorkflow::default(),
            subscriptions: BTreeMap::new(),
            tools,
        })
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.store.current_session()
    }

    pub fn is_mounted(&self, session_id: &str) -> bool {
        self.subscriptions.contains_key(session_id)
    }

    /// Starts the event subscription for a session view. Mounting an already
    /// mounted session keeps its transient state.
    pub fn mount(&mut self, session_id: &str) {
        if self.subscriptions.contains_key(session_id) {
            return;
        }
        let backend_session_id = self
            .store
            .session(session_id)
            .and_then(|session| session.resume.backend_session_id.clone());
        let subscription =
            EventSubscription::mount(session_id, backend_session_id, &self.config.pipeline);
        tracing::debug!(session_id, "subscription mounted");
        self.subscriptions
            .insert(session_id.to_string(), subscription);
    }

    /// Tears down a session view. Transient state goes away; the transcript
    /// stays in the store.
    pub fn unmount(&mut self, session_id: &str) {
        if self.subscriptions.remove(session_id).is_some() {
            self.store.settle_streaming(session_id);
            tracing::debug!(session_id, "subscription unmounted");
        }
    }

    pub fn unmount_all_except(&mut self, keep: &str) {
        let others: Vec<String> = self
            .subscriptions
            .keys()
            .filter(|id| id.as_str() != keep)
            .cloned()
            .collect();
        for id in others {
            self.unmount(&id);
        }
    }
}
