use std::collections::BTreeMap;
use std::path::Path;

use super::actions::BackendCommand;
use super::conversation::ConversationStore;
use super::event::ApplyPatchApprovalRequestEvent;
use super::event::ExecApprovalRequestEvent;
use super::event::FileChange;
use super::event::PatchApprovalRequestEvent;
use super::state::ApprovalDecision;
use super::state::ApprovalKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Event id of the request; also the id of its transcript entry.
    pub approval_id: String,
    pub session_id: String,
    pub kind: ApprovalKind,
    pub call_id: String,
    pub summary: String,
}

/// Approvals awaiting a user decision, keyed by approval id.
#[derive(Debug, Clone, Default)]
pub struct ApprovalWorkflow {
    pending: BTreeMap<String, PendingApproval>,
}

impl ApprovalWorkflow {
    pub fn register(&mut self, approval: PendingApproval) {
        tracing::debug!(
            approval_id = approval.approval_id.as_str(),
            kind = approval.kind.label(),
            "approval pending"
        );
        self.pending.insert(approval.approval_id.clone(), approval);
    }

    pub fn get(&self, approval_id: &str) -> Option<&PendingApproval> {
        self.pending.get(approval_id)
    }

    pub fn pending_for<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a PendingApproval> + 'a {
        self.pending
            .values()
            .filter(move |approval| approval.session_id == session_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolves a pending approval: the record is dropped, the transcript entry
    /// is marked with the decision and stays in place. Unknown ids are ignored.
    pub fn decide(
        &mut self,
        approval_id: &str,
        decision: ApprovalDecision,
        store: &mut ConversationStore,
    ) -> Option<BackendCommand> {
        let Some(approval) = self.pending.remove(approval_id) else {
            tracing::warn!(approval_id, "decision for unknown approval; ignoring");
            return None;
        };
        let marked = store.update_message(&approval.session_id, approval_id, |message| {
            if let Some(request) = message.approval_request.as_mut() {
                request.resolution = Some(decision);
            }
        });
        if !marked {
            tracing::warn!(approval_id, "approval entry missing from transcript");
        }
        tracing::info!(
            approval_id,
            decision = decision.label(),
            "approval decided"
        );
        Some(BackendCommand::RespondApproval {
            session_id: approval.session_id,
            approval_id: approval.approval_id,
            kind: approval.kind,
            decision,
        })
    }

    pub fn drop_session(&mut self, session_id: &str) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, approval| approval.session_id != session_id);
        before - self.pending.len()
    }
}

pub fn exec_summary(request: &ExecApprovalRequestEvent) -> String {
    let mut summary = format!(
        "Run `{}` in {}",
        request.command.join(" "),
        request.cwd.display()
    );
    push_reason(&mut summary, request.reason.as_deref());
    summary
}

pub fn patch_summary(request: &PatchApprovalRequestEvent) -> String {
    let mut summary = String::from("Apply patch");
    push_reason(&mut summary, request.reason.as_deref());
    if !request.patch.trim().is_empty() {
        summary.push_str("\n\n");
        summary.push_str(&fenced("diff", &request.patch));
    }
    summary
}

pub fn apply_patch_summary(request: &ApplyPatchApprovalRequestEvent) -> String {
    let root = request.grant_root.as_deref();
    let count = request.changes.len();
    let mut summary = format!(
        "Apply changes to {count} file{}",
        if count == 1 { "" } else { "s" }
    );
    push_reason(&mut summary, request.reason.as_deref());
    for (path, change) in &request.changes {
        let shown = relativize(path, root);
        summary.push_str("\n\n");
        match change {
            FileChange::Add { content } => {
                summary.push_str(&format!("Add {shown}\n"));
                summary.push_str(&fenced("", content));
            }
            FileChange::Delete { .. } => {
                summary.push_str(&format!("Remove {shown}"));
            }
            FileChange::Update {
                unified_diff,
                move_path,
            } => {
                match move_path {
                    Some(dest) => summary.push_str(&format!(
                        "Move {shown} -> {}\n",
                        relativize(dest, root)
                    )),
                    None => summary.push_str(&format!("Modify {shown}\n")),
                }
                summary.push_str(&fenced("diff", unified_diff));
            }
        }
    }
    summary
}

fn push_reason(summary: &mut String, reason: Option<&str>) {
    if let Some(reason) = reason.map(str::trim).filter(|reason| !reason.is_empty()) {
        summary.push_str("\nReason: ");
        summary.push_str(reason);
    }
}

fn relativize(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| path.strip_prefix(root).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or(path)
        .display()
        .to_string()
}

pub(crate) fn fenced(lang: &str, body: &str) -> String {
    let body = body.strip_suffix('\n').unwrap_or(body);
    format!("```{lang}\n{body}\n```")
}
