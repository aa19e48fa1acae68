use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tether_core::ApprovalDecision;
use tether_core::ApprovalKind;

use super::contracts::ExecRequest;

/// Builds `codex proto` invocations. The proto mode speaks JSON lines:
/// submissions on stdin, events on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexAdapter {
    program: PathBuf,
    codex_home: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl CodexAdapter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            codex_home: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_codex_home(mut self, codex_home: Option<PathBuf>) -> Self {
        self.codex_home = codex_home;
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn proto(&self, cwd: PathBuf, model: Option<&str>, provider: Option<&str>) -> ExecRequest {
        let mut args = vec!["proto".to_string()];
        if let Some(model) = model {
            args.push("-c".to_string());
            args.push(format!("model={}", toml_string(model)));
        }
        if let Some(provider) = provider {
            args.push("-c".to_string());
            args.push(format!("model_provider={}", toml_string(provider)));
        }
        args.extend(self.extra_args.iter().cloned());

        let mut env = Vec::new();
        if let Some(home) = self.codex_home.as_ref() {
            env.push(("CODEX_HOME".to_string(), home.display().to_string()));
        }
        ExecRequest {
            cwd,
            program: self.program.clone(),
            args,
            env,
        }
    }
}

fn toml_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// One line written to the codex process stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub op: Op,
}

impl Submission {
    pub fn new(op: Op) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            op,
        }
    }

    pub fn user_text(text: &str) -> Self {
        Self::new(Op::UserInput {
            items: vec![InputItem::Text {
                text: text.to_string(),
            }],
        })
    }

    pub fn approval(approval_id: &str, kind: ApprovalKind, decision: ApprovalDecision) -> Self {
        let id = correlation_id(approval_id).to_string();
        let decision = ReviewDecision::from(decision);
        Self::new(match kind {
            ApprovalKind::Exec => Op::ExecApproval { id, decision },
            ApprovalKind::Patch | ApprovalKind::ApplyPatch => Op::PatchApproval { id, decision },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    UserInput { items: Vec<InputItem> },
    ExecApproval { id: String, decision: ReviewDecision },
    PatchApproval { id: String, decision: ReviewDecision },
    Interrupt,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Text { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Denied,
}

impl From<ApprovalDecision> for ReviewDecision {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approved => Self::Approved,
            ApprovalDecision::Denied => Self::Denied,
        }
    }
}

const LINE_TAG: char = '#';

/// Codex reuses the submission id for every event of a turn. Suffixing the
/// line sequence gives each event its own identity so deduplication only
/// drops true redeliveries.
pub fn tag_event_line(event: &mut Value, seq: u64) {
    let Some(id) = event.get("id").and_then(Value::as_str) else {
        return;
    };
    let tagged = format!("{id}{LINE_TAG}{seq}");
    event["id"] = Value::String(tagged);
}

/// The submission id codex expects back, with any line tag removed.
pub fn correlation_id(event_id: &str) -> &str {
    event_id
        .split_once(LINE_TAG)
        .map_or(event_id, |(id, _)| id)
}

/// Parses one stdout line. Anything that is not a JSON object is banner or
/// log noise and yields `None`.
pub fn parse_event_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        if !trimmed.is_empty() {
            tracing::debug!(line = trimmed, "non-JSON backend output");
        }
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(%err, "unparseable backend line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use tether_core::ApprovalDecision;
    use tether_core::ApprovalKind;

    use super::correlation_id;
    use super::parse_event_line;
    use super::tag_event_line;
    use super::CodexAdapter;
    use super::Submission;
    use pretty_assertions::assert_eq;

    #[test]
    fn proto_request_carries_overrides() {
        let adapter = CodexAdapter::new("/usr/local/bin/codex")
            .with_codex_home(Some(PathBuf::from("/tmp/codex-home")))
            .with_extra_args(vec!["--full-auto".to_string()]);
        let request = adapter.proto(PathBuf::from("/repo"), Some("gpt-5"), None);
        assert_eq!(
            request.args,
            vec![
                "proto".to_string(),
                "-c".to_string(),
                "model=\"gpt-5\"".to_string(),
                "--full-auto".to_string()
            ]
        );
        assert_eq!(
            request.env,
            vec![("CODEX_HOME".to_string(), "/tmp/codex-home".to_string())]
        );
        assert_eq!(request.cwd, PathBuf::from("/repo"));
    }

    #[test]
    fn user_text_submission_shape() {
        let submission = Submission::user_text("hello");
        let encoded = serde_json::to_value(&submission).expect("encode");
        assert_eq!(
            encoded["op"],
            json!({ "type": "user_input", "items": [{ "type": "text", "text": "hello" }] })
        );
        assert!(encoded["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn approval_submissions_pick_op_by_kind() {
        let exec = serde_json::to_value(Submission::approval(
            "evt-42",
            ApprovalKind::Exec,
            ApprovalDecision::Approved,
        ))
        .expect("encode");
        assert_eq!(
            exec["op"],
            json!({ "type": "exec_approval", "id": "evt-42", "decision": "approved" })
        );

        let patch = serde_json::to_value(Submission::approval(
            "evt-43",
            ApprovalKind::ApplyPatch,
            ApprovalDecision::Denied,
        ))
        .expect("encode");
        assert_eq!(
            patch["op"],
            json!({ "type": "patch_approval", "id": "evt-43", "decision": "denied" })
        );
    }

    #[test]
    fn shared_submission_ids_get_line_tags() {
        let mut first = json!({ "id": "0", "msg": { "type": "agent_message_delta", "delta": "a" } });
        let mut second = first.clone();
        tag_event_line(&mut first, 1);
        tag_event_line(&mut second, 2);
        assert_eq!(first["id"], json!("0#1"));
        assert_eq!(second["id"], json!("0#2"));

        let mut anonymous = json!({ "msg": { "type": "task_started" } });
        tag_event_line(&mut anonymous, 3);
        assert_eq!(anonymous, json!({ "msg": { "type": "task_started" } }));
    }

    #[test]
    fn approval_answers_the_untagged_submission_id() {
        assert_eq!(correlation_id("0#17"), "0");
        assert_eq!(correlation_id("evt-42"), "evt-42");

        let exec = serde_json::to_value(Submission::approval(
            "0#17",
            ApprovalKind::Exec,
            ApprovalDecision::Approved,
        ))
        .expect("encode");
        assert_eq!(
            exec["op"],
            json!({ "type": "exec_approval", "id": "0", "decision": "approved" })
        );
    }

    #[test]
    fn parse_event_line_skips_noise() {
        assert_eq!(parse_event_line("Reading prompt from stdin..."), None);
        assert_eq!(parse_event_line("   "), None);
        assert_eq!(parse_event_line("{not json"), None);
        assert_eq!(
            parse_event_line(r#"{"id":"1","msg":{"type":"task_started"}}"#),
            Some(json!({ "id": "1", "msg": { "type": "task_started" } }))
        );
    }
}
