use std::collections::HashMap;
use std::io;
use std::io::Write;

use crossterm::style::Color;
use crossterm::style::Stylize;
use tether_core::event::StepStatus;
use tether_core::state::ApprovalDecision;
use tether_core::state::Message;
use tether_core::state::MessageType;
use tether_core::state::Role;
use tether_core::state::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Printed {
    content: String,
    title: Option<String>,
    streaming: bool,
    resolution: Option<ApprovalDecision>,
}

impl Printed {
    fn of(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            title: message.title.clone(),
            streaming: message.is_streaming,
            resolution: message
                .approval_request
                .as_ref()
                .and_then(|request| request.resolution),
        }
    }
}

/// Writes a session transcript to a line terminal as it changes. Streaming
/// entries are written chunk by chunk; entries rewritten in place (exec
/// results, resolved approvals, superseded streams) are printed again.
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    color: bool,
    printed: HashMap<String, Printed>,
    open_stream: Option<String>,
}

impl TranscriptRenderer {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    /// Forgets what was printed, e.g. after switching sessions.
    pub fn reset(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.close_stream(out)?;
        self.printed.clear();
        Ok(())
    }

    pub fn finish_stream(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.close_stream(out)
    }

    pub fn render_update(&mut self, session: &Session, out: &mut impl Write) -> io::Result<()> {
        for message in &session.messages {
            let now = Printed::of(message);
            let Some(before) = self.printed.get(&message.id) else {
                self.close_stream(out)?;
                self.write_entry(message, out)?;
                self.printed.insert(message.id.clone(), now);
                continue;
            };
            if *before == now {
                continue;
            }

            let extends = before.streaming
                && self.open_stream.as_deref() == Some(message.id.as_str())
                && message.content.starts_with(&before.content);
            if extends {
                out.write_all(message.content[before.content.len()..].as_bytes())?;
                if !message.is_streaming {
                    self.close_stream(out)?;
                }
            } else {
                self.close_stream(out)?;
                self.write_entry(message, out)?;
            }
            self.printed.insert(message.id.clone(), now);
        }
        out.flush()
    }

    fn write_entry(&mut self, message: &Message, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", self.paint_header(message))?;
        if message.is_streaming {
            out.write_all(message.content.as_bytes())?;
            self.open_stream = Some(message.id.clone());
            return Ok(());
        }
        let body = body(message);
        if !body.is_empty() {
            writeln!(out, "{body}")?;
        }
        writeln!(out)
    }

    fn close_stream(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.open_stream.take().is_some() {
            writeln!(out)?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn paint_header(&self, message: &Message) -> String {
        let text = header(message);
        if !self.color {
            return text;
        }
        let color = match message.role {
            Role::User => Color::Cyan,
            Role::Assistant => Color::Green,
            Role::Approval => Color::Yellow,
            Role::System if message.title.as_deref() == Some("Error") => Color::Red,
            Role::System => Color::DarkGrey,
        };
        text.as_str().with(color).bold().to_string()
    }
}

/// The whole transcript as plain text, for replays and `sessions` output.
pub fn render_full(session: &Session) -> String {
    let mut out = format!("# {}\n\n", session.display_title());
    for message in &session.messages {
        out.push_str(&header(message));
        out.push('\n');
        let body = body(message);
        if !body.is_empty() {
            out.push_str(&body);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub fn header(message: &Message) -> String {
    match message.role {
        Role::User => "» you".to_string(),
        Role::Assistant => "• assistant".to_string(),
        Role::Approval => approval_header(message),
        Role::System => {
            let title = message.title.as_deref();
            match message.message_type {
                Some(MessageType::ExecCommand) => format!("$ {}", title.unwrap_or("command")),
                Some(MessageType::ToolCall) => format!("⚙ {}", title.unwrap_or("tool")),
                Some(MessageType::Reasoning) => "… reasoning".to_string(),
                Some(MessageType::PlanUpdate) => "☰ plan".to_string(),
                None => format!("! {}", title.unwrap_or("system")),
            }
        }
    }
}

fn approval_header(message: &Message) -> String {
    let Some(request) = message.approval_request.as_ref() else {
        return format!("? approval {}", message.id);
    };
    let status = match request.resolution {
        Some(decision) => format!("[{}]", decision.label()),
        None => format!("(/approve {id} or /deny {id})", id = message.id),
    };
    format!(
        "? approval {} to {} {status}",
        message.id,
        request.kind.label()
    )
}

pub fn body(message: &Message) -> String {
    let Some(plan) = message.plan.as_ref() else {
        return message.content.clone();
    };
    let mut lines: Vec<String> = Vec::new();
    if let Some(explanation) = plan.explanation.as_deref().filter(|text| !text.is_empty()) {
        lines.push(explanation.to_string());
    }
    for item in &plan.steps {
        let mark = match item.status {
            StepStatus::Completed => "[x]",
            StepStatus::InProgress => "[~]",
            StepStatus::Pending => "[ ]",
        };
        lines.push(format!("  {mark} {}", item.step));
    }
    lines.join("\n")
}
