use serde_json::Map;
use serde_json::Value;

use super::event::BackendEvent;
use super::event::EventMsg;

/// One field-name synonym rule: when `canonical` is absent from a `kind`
/// payload, the first present fallback is copied into it. Fallbacks starting
/// with `/` are JSON pointers into nested objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynonymRule {
    pub kind: &'static str,
    pub canonical: &'static str,
    pub fallbacks: &'static [&'static str],
}

pub const SYNONYM_TABLE: &[SynonymRule] = &[
    SynonymRule {
        kind: "agent_message",
        canonical: "message",
        fallbacks: &["text", "content"],
    },
    SynonymRule {
        kind: "agent_message_delta",
        canonical: "delta",
        fallbacks: &["text", "content"],
    },
    SynonymRule {
        kind: "agent_reasoning",
        canonical: "text",
        fallbacks: &["reasoning", "content"],
    },
    SynonymRule {
        kind: "agent_reasoning_raw_content",
        canonical: "text",
        fallbacks: &["content", "reasoning"],
    },
    SynonymRule {
        kind: "agent_reasoning_delta",
        canonical: "delta",
        fallbacks: &["text"],
    },
    SynonymRule {
        kind: "agent_reasoning_raw_content_delta",
        canonical: "delta",
        fallbacks: &["text"],
    },
    SynonymRule {
        kind: "turn_diff",
        canonical: "unified_diff",
        fallbacks: &["text", "diff"],
    },
    SynonymRule {
        kind: "error",
        canonical: "message",
        fallbacks: &["text", "error"],
    },
    SynonymRule {
        kind: "stream_error",
        canonical: "message",
        fallbacks: &["text", "error"],
    },
    SynonymRule {
        kind: "session_configured",
        canonical: "session_id",
        fallbacks: &["sessionId"],
    },
    SynonymRule {
        kind: "session_configured",
        canonical: "rollout_path",
        fallbacks: &["rolloutPath"],
    },
    SynonymRule {
        kind: "exec_command_end",
        canonical: "exit_code",
        fallbacks: &["exitCode"],
    },
    SynonymRule {
        kind: "exec_command_end",
        canonical: "stdout",
        fallbacks: &["aggregated_output", "output"],
    },
    SynonymRule {
        kind: "mcp_tool_call_begin",
        canonical: "tool",
        fallbacks: &["/invocation/tool", "tool_name", "name"],
    },
    SynonymRule {
        kind: "mcp_tool_call_begin",
        canonical: "server",
        fallbacks: &["/invocation/server"],
    },
    SynonymRule {
        kind: "mcp_tool_call_begin",
        canonical: "arguments",
        fallbacks: &["/invocation/arguments", "args"],
    },
    SynonymRule {
        kind: "web_search_begin",
        canonical: "query",
        fallbacks: &["search_query", "q"],
    },
    SynonymRule {
        kind: "apply_patch_approval_request",
        canonical: "changes",
        fallbacks: &["files"],
    },
    SynonymRule {
        kind: "apply_patch_approval_request",
        canonical: "grant_root",
        fallbacks: &["grantRoot"],
    },
    SynonymRule {
        kind: "patch_approval_request",
        canonical: "patch",
        fallbacks: &["unified_diff", "diff", "text"],
    },
    SynonymRule {
        kind: "plan_update",
        canonical: "plan",
        fallbacks: &["steps"],
    },
    SynonymRule {
        kind: "turn_aborted",
        canonical: "reason",
        fallbacks: &["message"],
    },
];

pub const KNOWN_KINDS: &[&str] = &[
    "session_configured",
    "task_started",
    "turn_started",
    "task_complete",
    "turn_complete",
    "agent_message",
    "agent_message_delta",
    "agent_reasoning",
    "agent_reasoning_raw_content",
    "agent_reasoning_delta",
    "agent_reasoning_raw_content_delta",
    "agent_reasoning_section_break",
    "user_message",
    "plan_update",
    "mcp_tool_call_begin",
    "mcp_tool_call_end",
    "web_search_begin",
    "web_search_end",
    "exec_command_begin",
    "exec_command_output_delta",
    "exec_command_end",
    "exec_approval_request",
    "patch_approval_request",
    "apply_patch_approval_request",
    "patch_apply_begin",
    "patch_apply_end",
    "error",
    "stream_error",
    "turn_aborted",
    "turn_diff",
    "shutdown_complete",
    "token_count",
    "background_event",
];

const ENVELOPE_ID_KEYS: &[&str] = &["id", "event_id", "eventId"];
const ENVELOPE_SESSION_KEYS: &[&str] = &["session_id", "sessionId", "conversation_id"];
const ENVELOPE_KIND_KEYS: &[&str] = &["type", "kind"];
const ENVELOPE_PAYLOAD_KEYS: &[&str] = &["msg", "payload", "data"];

pub fn is_known_kind(kind: &str) -> bool {
    KNOWN_KINDS.contains(&kind)
}

/// Present canonical fields are never overwritten.
pub fn apply_synonyms(kind: &str, payload: &mut Map<String, Value>) {
    for rule in SYNONYM_TABLE.iter().filter(|rule| rule.kind == kind) {
        if is_present(payload.get(rule.canonical)) {
            continue;
        }
        let snapshot = Value::Object(payload.clone());
        let found = rule.fallbacks.iter().find_map(|fallback| {
            let value = if fallback.starts_with('/') {
                snapshot.pointer(fallback)
            } else {
                snapshot.get(*fallback)
            };
            value.filter(|value| !value.is_null()).cloned()
        });
        if let Some(value) = found {
            payload.insert(rule.canonical.to_string(), value);
        }
    }
}

/// A known kind whose payload still does not fit after synonym resolution is
/// dropped.
pub fn normalize_payload(kind: &str, payload: Value) -> Option<EventMsg> {
    if !is_known_kind(kind) {
        return Some(EventMsg::Unknown {
            kind: kind.to_string(),
        });
    }

    let mut fields = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!(kind, payload = %other, "dropping event with non-object payload");
            return None;
        }
    };
    apply_synonyms(kind, &mut fields);
    fields.insert("type".to_string(), Value::String(kind.to_string()));

    match serde_json::from_value::<EventMsg>(Value::Object(fields)) {
        Ok(msg) => Some(msg),
        Err(err) => {
            tracing::warn!(kind, error = %err, "dropping malformed event payload");
            None
        }
    }
}

/// Best-effort normalization of a raw (schema-mismatched) event.
pub fn normalize_raw(raw: &Value) -> Option<BackendEvent> {
    let Some(envelope) = raw.as_object() else {
        tracing::warn!("dropping raw event that is not a JSON object");
        return None;
    };

    let payload_value = ENVELOPE_PAYLOAD_KEYS
        .iter()
        .find_map(|key| envelope.get(*key).filter(|value| value.is_object()));

    let kind = payload_value
        .and_then(|payload| first_string(payload.as_object()?, ENVELOPE_KIND_KEYS))
        .or_else(|| first_string(envelope, ENVELOPE_KIND_KEYS));
    let Some(kind) = kind else {
        tracing::warn!("dropping raw event without a kind discriminator");
        return None;
    };

    let Some(id) = first_string(envelope, ENVELOPE_ID_KEYS) else {
        tracing::warn!(kind = kind.as_str(), "dropping raw event without an id");
        return None;
    };
    let session_id = first_string(envelope, ENVELOPE_SESSION_KEYS);

    let payload = match payload_value {
        Some(payload) => payload.clone(),
        None => {
            let mut fields = envelope.clone();
            for key in ENVELOPE_ID_KEYS.iter().chain(ENVELOPE_SESSION_KEYS) {
                fields.remove(*key);
            }
            Value::Object(fields)
        }
    };

    let mut payload = payload;
    if let Value::Object(fields) = &mut payload {
        for key in ENVELOPE_KIND_KEYS {
            fields.remove(*key);
        }
    }

    let msg = normalize_payload(kind.as_str(), payload)?;
    Some(BackendEvent {
        id,
        session_id,
        msg,
    })
}

fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(|value| !value.is_null())
}

fn first_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::apply_synonyms;
    use super::normalize_payload;
    use super::normalize_raw;
    use crate::event::EventMsg;
    use crate::event::FileChange;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serde_json::Value;

    #[test]
    fn text_stands_in_for_reasoning() {
        let msg = normalize_payload("agent_reasoning", json!({ "reasoning": "thinking" }))
            .expect("normalized");
        match msg {
            EventMsg::AgentReasoning(event) => assert_eq!(event.text, "thinking"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn canonical_field_wins_over_synonym() {
        let msg = normalize_payload(
            "agent_message_delta",
            json!({ "delta": "canonical", "text": "fallback" }),
        )
        .expect("normalized");
        assert_eq!(
            msg,
            EventMsg::AgentMessageDelta(crate::event::DeltaEvent {
                delta: "canonical".to_string()
            })
        );
    }

    #[test]
    fn null_canonical_field_is_treated_as_absent() {
        let mut fields = json!({ "unified_diff": null, "text": "diff --git" })
            .as_object()
            .cloned()
            .expect("object");
        apply_synonyms("turn_diff", &mut fields);
        assert_eq!(fields.get("unified_diff"), Some(&json!("diff --git")));
    }

    #[test]
    fn nested_pointer_fallback_resolves_tool_invocation() {
        let msg = normalize_payload(
            "mcp_tool_call_begin",
            json!({
                "call_id": "c1",
                "invocation": { "server": "fs", "tool": "read_file", "arguments": { "path": "a" } }
            }),
        )
        .expect("normalized");
        match msg {
            EventMsg::McpToolCallBegin(event) => {
                assert_eq!(event.tool, "read_file");
                assert_eq!(event.server.as_deref(), Some("fs"));
                assert_eq!(event.arguments, Some(json!({ "path": "a" })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_passes_through() {
        let msg = normalize_payload("collab_waiting", json!({})).expect("passed through");
        assert_eq!(
            msg,
            EventMsg::Unknown {
                kind: "collab_waiting".to_string()
            }
        );
    }

    #[test]
    fn malformed_known_kind_is_dropped() {
        assert!(normalize_payload("exec_command_begin", json!({ "command": 42 })).is_none());
        assert!(normalize_payload("agent_message", Value::String("x".into())).is_none());
    }

    #[test]
    fn raw_envelope_with_msg_object() {
        let event = normalize_raw(&json!({
            "id": "evt-1",
            "sessionId": "s1",
            "msg": { "type": "agent_message", "text": "hello" }
        }))
        .expect("normalized");
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.kind(), "agent_message");
    }

    #[test]
    fn raw_flat_payload_with_kind_and_numeric_id() {
        let event = normalize_raw(&json!({
            "id": 17,
            "kind": "apply_patch_approval_request",
            "files": { "src/lib.rs": { "type": "add", "content": "fn main() {}" } },
            "grantRoot": "/repo"
        }))
        .expect("normalized");
        assert_eq!(event.id, "17");
        assert!(event.session_id.is_none());
        match event.msg {
            EventMsg::ApplyPatchApprovalRequest(request) => {
                assert_eq!(request.grant_root.as_deref(), Some(std::path::Path::new("/repo")));
                assert_eq!(request.changes.len(), 1);
                assert!(request
                    .changes
                    .values()
                    .all(|change| matches!(change, FileChange::Add { .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn raw_event_without_id_or_kind_is_dropped() {
        assert!(normalize_raw(&json!({ "msg": { "type": "agent_message" } })).is_none());
        assert!(normalize_raw(&json!({ "id": "x", "text": "hello" })).is_none());
        assert!(normalize_raw(&json!("not an object")).is_none());
    }
}
