use serde_json::Value;

use super::config::PipelineConfig;
use super::dedup::Deduplicator;
use super::event::BackendEvent;
use super::normalize::normalize_raw;
use super::reducer::ChatEffect;
use super::reducer::ReduceContext;
use super::reducer::SessionEventReducer;

/// An event as it arrives from the backend bridge: either already in the
/// canonical schema or a loose JSON object that still needs normalizing.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Structured(BackendEvent),
    Raw(Value),
}

impl Inbound {
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<BackendEvent>(value.clone()) {
            Ok(event) => Self::Structured(event),
            Err(_) => Self::Raw(value),
        }
    }

    /// Fills in the session id when the payload carries none.
    pub fn with_default_session(self, session_id: &str) -> Self {
        match self {
            Self::Structured(mut event) => {
                if event.session_id.is_none() {
                    event.session_id = Some(session_id.to_string());
                }
                Self::Structured(event)
            }
            Self::Raw(Value::Object(mut fields)) => {
                let tagged = ["session_id", "sessionId", "conversation_id"]
                    .iter()
                    .any(|key| fields.get(*key).is_some_and(Value::is_string));
                if !tagged {
                    fields.insert(
                        "session_id".to_string(),
                        Value::String(session_id.to_string()),
                    );
                }
                Self::Raw(Value::Object(fields))
            }
            other => other,
        }
    }

    pub fn into_event(self) -> Option<BackendEvent> {
        match self {
            Self::Structured(event) => Some(event),
            Self::Raw(value) => normalize_raw(&value),
        }
    }
}

/// Routing, deduplication and the session reducer for one mounted session.
#[derive(Debug, Clone)]
pub struct EventSubscription {
    session_id: String,
    alias_prefixes: Vec<String>,
    dedup: Deduplicator,
    reducer: SessionEventReducer,
}

impl EventSubscription {
    pub fn mount(
        session_id: &str,
        backend_session_id: Option<String>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            alias_prefixes: pipeline.session_alias_prefixes.clone(),
            dedup: Deduplicator::new(pipeline.dedup_threshold, pipeline.dedup_retain),
            reducer: SessionEventReducer::new(
                session_id,
                backend_session_id,
                pipeline.stream_commit,
            ),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn reducer(&self) -> &SessionEventReducer {
        &self.reducer
    }

    pub fn reducer_mut(&mut self) -> &mut SessionEventReducer {
        &mut self.reducer
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Events without a session id are broadcast.
    pub fn accepts(&self, event: &BackendEvent) -> bool {
        let Some(target) = event.session_id.as_deref() else {
            return true;
        };
        let bare = self
            .alias_prefixes
            .iter()
            .find_map(|prefix| target.strip_prefix(prefix.as_str()))
            .unwrap_or(target);
        let backend = self.reducer.backend_session_id();
        bare == self.session_id
            || target == self.session_id
            || backend.is_some_and(|handle| handle == bare || handle == target)
    }

    pub fn deliver(
        &mut self,
        event: &BackendEvent,
        ctx: &mut ReduceContext<'_>,
    ) -> Vec<ChatEffect> {
        if !self.accepts(event) {
            return Vec::new();
        }
        if !self.dedup.should_process(event) {
            tracing::debug!(
                session_id = self.session_id.as_str(),
                id = event.id.as_str(),
                kind = event.kind(),
                "duplicate event dropped"
            );
            return Vec::new();
        }
        self.reducer.handle(event, ctx)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Inbound;
    use crate::event::EventMsg;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_values_parse_as_structured() {
        let inbound = Inbound::from_value(json!({
            "id": "1",
            "msg": { "type": "task_started" }
        }));
        assert!(matches!(inbound, Inbound::Structured(_)));
    }

    #[test]
    fn loose_values_fall_back_to_raw_and_normalize() {
        let inbound = Inbound::from_value(json!({
            "eventId": "7",
            "type": "agent_message",
            "text": "hello"
        }));
        assert!(matches!(inbound, Inbound::Raw(_)));
        let event = inbound.into_event().expect("normalized");
        assert_eq!(event.id, "7");
        assert!(matches!(event.msg, EventMsg::AgentMessage(ref m) if m.message == "hello"));
    }

    #[test]
    fn default_session_does_not_override_existing_tag() {
        let tagged = Inbound::from_value(json!({
            "id": "1",
            "conversation_id": "other",
            "type": "task_started"
        }))
        .with_default_session("mine");
        let event = tagged.into_event().expect("event");
        assert_eq!(event.session_id.as_deref(), Some("other"));

        let untagged = Inbound::from_value(json!({
            "id": "2",
            "msg": { "type": "task_started" }
        }))
        .with_default_session("mine");
        let event = untagged.into_event().expect("event");
        assert_eq!(event.session_id.as_deref(), Some("mine"));
    }
}
