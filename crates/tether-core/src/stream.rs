use serde::Deserialize;
use serde::Serialize;

/// Receiver of streamed content for one transcript entry.
pub trait StreamSink {
    fn show(&mut self, target: &str, content: &str);
    fn end_stream(&mut self, target: &str);
}

/// When buffered text becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    #[default]
    Immediate,
    /// Hold back a trailing partial line until finalize.
    CompleteLines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    target: String,
    text: String,
    committed: usize,
}

impl StreamBuffer {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn committed(&self) -> &str {
        &self.text[..self.committed]
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamController {
    policy: CommitPolicy,
    active: Option<StreamBuffer>,
}

impl StreamController {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            active: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        if self.active.is_some() {
            StreamPhase::Streaming
        } else {
            StreamPhase::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn buffer(&self) -> Option<&StreamBuffer> {
        self.active.as_ref()
    }

    pub fn target(&self) -> Option<&str> {
        self.active.as_ref().map(StreamBuffer::target)
    }

    /// False when a stream is already open.
    pub fn begin(&mut self, target: impl Into<String>) -> bool {
        let target = target.into();
        if let Some(current) = self.active.as_ref() {
            tracing::warn!(
                current = current.target.as_str(),
                requested = target.as_str(),
                "stream already open; ignoring begin"
            );
            return false;
        }
        tracing::debug!(target = target.as_str(), "stream.begin");
        self.active = Some(StreamBuffer {
            target,
            text: String::new(),
            committed: 0,
        });
        true
    }

    pub fn push_and_maybe_commit(&mut self, delta: &str, sink: &mut impl StreamSink) {
        let policy = self.policy;
        let Some(buffer) = self.active.as_mut() else {
            tracing::warn!("delta pushed with no open stream; dropping");
            return;
        };
        buffer.text.push_str(delta);

        let commit_to = match policy {
            CommitPolicy::Immediate => buffer.text.len(),
            CommitPolicy::CompleteLines => buffer
                .text
                .rfind('\n')
                .map_or(buffer.committed, |idx| idx + 1),
        };
        if commit_to > buffer.committed {
            buffer.committed = commit_to;
            sink.show(&buffer.target, buffer.committed());
        }
    }

    /// Without `commit` any text not yet shown is discarded.
    pub fn finalize(&mut self, commit: bool, sink: &mut impl StreamSink) -> Option<String> {
        let buffer = self.active.take()?;
        if commit && buffer.committed < buffer.text.len() {
            sink.show(&buffer.target, &buffer.text);
        }
        tracing::debug!(
            target = buffer.target.as_str(),
            commit,
            len = buffer.text.len(),
            "stream.finalize"
        );
        sink.end_stream(&buffer.target);
        Some(buffer.target)
    }

    pub fn clear_all(&mut self) {
        if let Some(buffer) = self.active.take() {
            tracing::debug!(target = buffer.target.as_str(), "stream.clear_all");
        }
    }
}
