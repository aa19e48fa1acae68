use std::io;
use std::io::BufRead;
use std::io::IsTerminal;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use tether_core::config::Config;
use tether_core::conversation::ConversationStore;
use tether_core::reduce;
use tether_core::subscription::Inbound;
use tether_core::ApprovalDecision;
use tether_core::BackendCommand;
use tether_core::ChatAction;
use tether_core::ChatEffect;
use tether_core::ChatState;
use tether_core::CommandKind;
use tether_core::JsonFileStore;
use tether_core::RecordedEventLog;
use tether_core::Role;
use tether_core::RuntimeAction;
use tether_core::Session;
use tether_core::UserAction;
use tether_exec::discovery::discover_codex_command;
use tether_exec::discovery::DiscoveryEnv;
use tether_exec::dispatch;
use tether_exec::rollout::codex_home;
use tether_exec::rollout::find_rollout_path;
use tether_exec::BackendClient;
use tether_exec::BackendError;
use tether_exec::BridgeCallback;
use tether_exec::BridgeEvent;
use tether_exec::CodexAdapter;
use tether_exec::CodexBridge;

use crate::config::data_dir;
use crate::render::TranscriptRenderer;

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Edit(String),
    Approve(String),
    Deny(String),
    Interrupt,
    New,
    Rename(String),
    Select(String),
    Delete(String),
    Sessions,
    Help,
    Quit,
}

/// Everything the chat loop reacts to, funnelled through one channel so the
/// reducer only ever runs on the loop thread.
#[derive(Debug)]
pub enum AppMessage {
    Input(Input),
    InputError(String),
    Action(ChatAction),
    Bridge(BridgeEvent),
    InputClosed,
}

pub fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Send(line.to_string())));
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let required = |usage: &str| -> Result<String, String> {
        if rest.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(rest.to_string())
        }
    };
    let input = match name {
        "approve" | "y" => Input::Approve(required("/approve <id>")?),
        "deny" | "n" => Input::Deny(required("/deny <id>")?),
        "edit" => Input::Edit(required("/edit <text>")?),
        "rename" => Input::Rename(required("/rename <title>")?),
        "select" => Input::Select(required("/select <session-id>")?),
        "delete" => Input::Delete(required("/delete <session-id>")?),
        "interrupt" => Input::Interrupt,
        "new" => Input::New,
        "sessions" => Input::Sessions,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("unknown command: /{other} (try /help)")),
    };
    Ok(Some(input))
}

/// Resolves a full session id from a unique prefix.
pub fn resolve_session_id(store: &ConversationStore, prefix: &str) -> Result<String, String> {
    if store.session(prefix).is_some() {
        return Ok(prefix.to_string());
    }
    let matches: Vec<&Session> = store
        .list_sessions(None)
        .into_iter()
        .filter(|session| session.id.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => Err(format!("no session matches {prefix}")),
        _ => Err(format!("{prefix} matches {} sessions", matches.len())),
    }
}

/// Maps prompt input onto a reducer action. `Err` carries a notice for the
/// user when the input cannot apply to the current state.
pub fn to_action(state: &ChatState, input: Input) -> Result<ChatAction, String> {
    let current = state.store.current_session_id().map(str::to_string);
    let action = match input {
        Input::Send(text) => UserAction::SendMessage { text },
        Input::Edit(text) => {
            let session = state.current_session().ok_or("no current session")?;
            let last_user = session
                .messages
                .iter()
                .rev()
                .find(|message| message.role == Role::User)
                .ok_or("nothing to edit yet")?;
            UserAction::EditAndResend {
                session_id: session.id.clone(),
                message_id: last_user.id.clone(),
                text,
            }
        }
        Input::Approve(approval_id) => UserAction::DecideApproval {
            approval_id,
            decision: ApprovalDecision::Approved,
        },
        Input::Deny(approval_id) => UserAction::DecideApproval {
            approval_id,
            decision: ApprovalDecision::Denied,
        },
        Input::Interrupt => UserAction::Interrupt,
        Input::New => UserAction::NewSession,
        Input::Rename(title) => UserAction::RenameSession {
            session_id: current.ok_or("no current session")?,
            title,
        },
        Input::Select(prefix) => UserAction::SelectSession {
            session_id: resolve_session_id(&state.store, &prefix)?,
        },
        Input::Delete(prefix) => UserAction::DeleteSession {
            session_id: resolve_session_id(&state.store, &prefix)?,
        },
        Input::Sessions | Input::Help | Input::Quit => {
            return Err("not a chat action".to_string());
        }
    };
    Ok(ChatAction::User(action))
}

/// Runs reducer effects. Backend failures and resume-path lookups come back
/// on `tx` as runtime actions.
pub fn run_effects(
    effects: Vec<ChatEffect>,
    client: &mut dyn BackendClient,
    codex_home: Option<&PathBuf>,
    tx: &Sender<AppMessage>,
) -> Vec<ChatEffect> {
    let mut unhandled = Vec::new();
    for effect in effects {
        match effect {
            ChatEffect::Dispatch(BackendCommand::ResolveResumePath {
                session_id,
                backend_session_id,
            }) => spawn_resume_lookup(codex_home.cloned(), session_id, backend_session_id, tx),
            ChatEffect::Dispatch(command) => {
                if let Err(err) = dispatch(client, &command) {
                    tracing::warn!(
                        session_id = command.session_id(),
                        command = command.kind().label(),
                        %err,
                        "backend command failed"
                    );
                    let failed = RuntimeAction::CommandFailed {
                        session_id: command.session_id().to_string(),
                        command: command.kind(),
                        message: err.to_string(),
                    };
                    let _ = tx.send(AppMessage::Action(ChatAction::Runtime(failed)));
                }
            }
            other => unhandled.push(other),
        }
    }
    unhandled
}

fn spawn_resume_lookup(
    codex_home: Option<PathBuf>,
    session_id: String,
    backend_session_id: String,
    tx: &Sender<AppMessage>,
) {
    let tx = tx.clone();
    std::thread::spawn(move || {
        let lookup = codex_home
            .as_deref()
            .map(|home| find_rollout_path(home, &backend_session_id));
        let action = match lookup {
            Some(Ok(path)) => RuntimeAction::ResumePathResolved { session_id, path },
            None => RuntimeAction::ResumePathResolved {
                session_id,
                path: None,
            },
            Some(Err(err)) => RuntimeAction::CommandFailed {
                session_id,
                command: CommandKind::ResolveResumePath,
                message: err.to_string(),
            },
        };
        let _ = tx.send(AppMessage::Action(ChatAction::Runtime(action)));
    });
}

fn spawn_input_reader(tx: Sender<AppMessage>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let message = match line.map(|line| parse_input(&line)) {
                Ok(Ok(Some(input))) => AppMessage::Input(input),
                Ok(Ok(None)) => continue,
                Ok(Err(notice)) => AppMessage::InputError(notice),
                Err(err) => {
                    tracing::warn!(%err, "stdin read failed");
                    break;
                }
            };
            if tx.send(message).is_err() {
                return;
            }
        }
        let _ = tx.send(AppMessage::InputClosed);
    });
}

pub fn session_line(session: &Session, current: bool) -> String {
    let marker = if current { "*" } else { " " };
    let short: String = session.id.chars().take(8).collect();
    format!(
        "{marker} {short}  {}  {:>3} msgs  {}",
        session.updated_at.format("%Y-%m-%d %H:%M"),
        session.messages.len(),
        session.display_title()
    )
}

struct ChatApp {
    state: ChatState,
    kv: JsonFileStore,
    log: RecordedEventLog,
    bridge: CodexBridge,
    renderer: TranscriptRenderer,
    codex_home: Option<PathBuf>,
    shown_session: Option<String>,
    tx: Sender<AppMessage>,
}

impl ChatApp {
    fn apply(&mut self, action: ChatAction, out: &mut impl Write) -> io::Result<()> {
        self.apply_with(action, true, out)
    }

    /// `persist` is false for streaming noise; the store is written again
    /// once the turn produces a lasting entry.
    fn apply_with(
        &mut self,
        action: ChatAction,
        persist: bool,
        out: &mut impl Write,
    ) -> io::Result<()> {
        let effects = reduce(&mut self.state, action);
        let rest = run_effects(
            effects,
            &mut self.bridge,
            self.codex_home.as_ref(),
            &self.tx,
        );
        for effect in rest {
            match effect {
                ChatEffect::StopStreaming { session_id } => {
                    if self.shown_session.as_deref() == Some(session_id.as_str()) {
                        self.renderer.finish_stream(out)?;
                    }
                }
                ChatEffect::TurnDiffUpdated { session_id } => {
                    let files = self
                        .state
                        .store
                        .turn_diff(&session_id)
                        .map(|diff| diff.lines().filter(|l| l.starts_with("diff --git")).count())
                        .unwrap_or(0);
                    if self.shown_session.as_deref() == Some(session_id.as_str()) {
                        self.renderer.finish_stream(out)?;
                        writeln!(out, "(turn diff updated: {files} file(s))")?;
                    }
                }
                ChatEffect::Dispatch(_) => {}
            }
        }
        if persist {
            if let Err(err) = self.state.store.persist(&mut self.kv) {
                tracing::warn!(%err, "persisting conversation store failed");
            }
        }
        self.render(out)
    }

    fn render(&mut self, out: &mut impl Write) -> io::Result<()> {
        let current = self.state.store.current_session_id().map(str::to_string);
        if current != self.shown_session {
            self.renderer.reset(out)?;
            self.shown_session = current.clone();
            if let Some(session) = self.state.current_session() {
                writeln!(out, "# {} ({})", session.display_title(), session.id)?;
            }
        }
        match self.state.current_session() {
            Some(session) => self.renderer.render_update(session, out),
            None => Ok(()),
        }
    }

    fn on_bridge(&mut self, event: BridgeEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            BridgeEvent::Line { session_id, raw } => {
                if let Err(err) = self.log.append(&session_id, &raw) {
                    tracing::warn!(%err, "recording backend event failed");
                }
                let inbound = Inbound::from_value(raw).with_default_session(&session_id);
                let Some(event) = inbound.into_event() else {
                    tracing::debug!(session_id = session_id.as_str(), "dropping malformed backend event");
                    return Ok(());
                };
                let persist = !event.msg.is_transient();
                let action = ChatAction::Runtime(RuntimeAction::Inbound(Inbound::Structured(event)));
                self.apply_with(action, persist, out)
            }
            BridgeEvent::Exited { session_id, code } => {
                let reaped = self.bridge.reap(&session_id);
                tracing::info!(
                    session_id = session_id.as_str(),
                    ?code,
                    reaped,
                    "backend process exited"
                );
                if !reaped || !self.state.store.is_loading(&session_id) {
                    return Ok(());
                }
                let message = match code {
                    Some(code) => format!("backend exited with status {code}"),
                    None => "backend exited".to_string(),
                };
                let failed = RuntimeAction::CommandFailed {
                    session_id,
                    command: CommandKind::SendUserMessage,
                    message,
                };
                self.apply(ChatAction::Runtime(failed), out)
            }
        }
    }

    fn list_sessions(&self, out: &mut impl Write) -> io::Result<()> {
        let current = self.state.store.current_session_id();
        let sessions = self.state.store.list_sessions(self.state.project.as_deref());
        if sessions.is_empty() {
            return writeln!(out, "(no sessions for this project)");
        }
        for session in sessions {
            writeln!(
                out,
                "{}",
                session_line(session, current == Some(session.id.as_str()))
            )?;
        }
        Ok(())
    }
}

pub fn print_commands(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Type a message to send it. Commands:")?;
    writeln!(out, "  /approve <id>   /deny <id>   /interrupt")?;
    writeln!(out, "  /edit <text>    resend the last message with new text")?;
    writeln!(out, "  /new   /sessions   /select <id>   /rename <title>   /delete <id>")?;
    writeln!(out, "  /help  /quit")
}

pub fn run_chat(repo: PathBuf, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let data = data_dir()?;
    std::fs::create_dir_all(&data)?;
    let kv = JsonFileStore::open(data.join("store.json"))?;
    let log = RecordedEventLog::open(data.join("events.jsonl"))?;
    tracing::debug!(store = %kv.path().display(), "conversation store opened");

    let program = config
        .backend
        .codex_path
        .clone()
        .or_else(|| discover_codex_command(&DiscoveryEnv::from_process()))
        .ok_or(BackendError::CodexNotFound)?;
    let adapter = CodexAdapter::new(program)
        .with_codex_home(config.backend.codex_home.clone())
        .with_extra_args(config.backend.extra_args.clone());
    let home = codex_home(config.backend.codex_home.as_deref());
    tracing::info!(program = %adapter.program().display(), repo = %repo.display(), "chat starting");

    let mut state = ChatState::new(config, Some(repo.clone()))?;
    state.store = ConversationStore::restore(&kv)?;
    let current_elsewhere = state
        .store
        .current_session()
        .is_some_and(|session| session.project_path.as_deref() != Some(repo.as_path()));
    if current_elsewhere {
        state.store.set_current_session(None);
    }
    if let Some(session_id) = state.store.current_session_id().map(str::to_string) {
        state.mount(&session_id);
    }

    let (tx, rx) = mpsc::channel();
    let bridge_tx = tx.clone();
    let on_event: BridgeCallback = Arc::new(move |event| {
        let _ = bridge_tx.send(AppMessage::Bridge(event));
    });
    let bridge = CodexBridge::new(adapter, repo, on_event);

    let mut app = ChatApp {
        state,
        kv,
        log,
        bridge,
        renderer: TranscriptRenderer::new(io::stdout().is_terminal()),
        codex_home: home,
        shown_session: None,
        tx: tx.clone(),
    };
    spawn_input_reader(tx);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "tether {}", env!("CARGO_PKG_VERSION"))?;
    print_commands(&mut out)?;
    app.render(&mut out)?;

    while let Ok(message) = rx.recv() {
        match message {
            AppMessage::Input(Input::Quit) | AppMessage::InputClosed => break,
            AppMessage::Input(Input::Help) => print_commands(&mut out)?,
            AppMessage::Input(Input::Sessions) => app.list_sessions(&mut out)?,
            AppMessage::Input(input) => match to_action(&app.state, input) {
                Ok(action) => app.apply(action, &mut out)?,
                Err(notice) => writeln!(out, "{notice}")?,
            },
            AppMessage::InputError(notice) => writeln!(out, "{notice}")?,
            AppMessage::Action(action) => app.apply(action, &mut out)?,
            AppMessage::Bridge(event) => app.on_bridge(event, &mut out)?,
        }
    }

    app.bridge.shutdown();
    app.state.store.persist(&mut app.kv)?;
    tracing::info!("chat finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use tether_core::reduce;
    use tether_core::ApprovalDecision;
    use tether_core::ApprovalKind;
    use tether_core::BackendCommand;
    use tether_core::ChatAction;
    use tether_core::ChatEffect;
    use tether_core::ChatState;
    use tether_core::CommandKind;
    use tether_core::Message;
    use tether_core::Role;
    use tether_core::RuntimeAction;
    use tether_core::Session;
    use tether_core::UserAction;
    use tether_exec::BackendClient;
    use tether_exec::BackendError;

    use super::parse_input;
    use super::resolve_session_id;
    use super::run_effects;
    use super::to_action;
    use super::AppMessage;
    use super::Input;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeClient {
        sent: Vec<String>,
        fail: bool,
    }

    impl BackendClient for FakeClient {
        fn send_user_message(
            &mut self,
            _session_id: &str,
            text: &str,
            _model: Option<&str>,
            _provider: Option<&str>,
        ) -> Result<(), BackendError> {
            if self.fail {
                return Err(BackendError::NotRunning("s1".to_string()));
            }
            self.sent.push(text.to_string());
            Ok(())
        }

        fn respond_approval(
            &mut self,
            _session_id: &str,
            approval_id: &str,
            _kind: ApprovalKind,
            _decision: ApprovalDecision,
        ) -> Result<(), BackendError> {
            self.sent.push(approval_id.to_string());
            Ok(())
        }

        fn interrupt(&mut self, _session_id: &str) -> Result<(), BackendError> {
            Ok(())
        }

        fn close_session(&mut self, session_id: &str) -> Result<(), BackendError> {
            self.sent.push(format!("close {session_id}"));
            Ok(())
        }
    }

    #[test]
    fn parses_plain_text_and_commands() {
        assert_eq!(
            parse_input("  hello there "),
            Ok(Some(Input::Send("hello there".to_string())))
        );
        assert_eq!(parse_input(""), Ok(None));
        assert_eq!(
            parse_input("/approve evt-3"),
            Ok(Some(Input::Approve("evt-3".to_string())))
        );
        assert_eq!(parse_input("/n evt-4"), Ok(Some(Input::Deny("evt-4".to_string()))));
        assert_eq!(
            parse_input("/rename Flaky test hunt"),
            Ok(Some(Input::Rename("Flaky test hunt".to_string())))
        );
        assert_eq!(parse_input("/quit"), Ok(Some(Input::Quit)));
        assert_eq!(
            parse_input("/approve"),
            Err("usage: /approve <id>".to_string())
        );
        assert!(parse_input("/bogus").is_err());
    }

    #[test]
    fn session_prefix_must_be_unique() {
        let mut state = ChatState::new(Default::default(), None).expect("state");
        state.store.insert_session(Session::new("abc-1", None));
        state.store.insert_session(Session::new("abc-2", None));
        state.store.insert_session(Session::new("xyz-9", None));

        assert_eq!(resolve_session_id(&state.store, "xyz"), Ok("xyz-9".to_string()));
        assert_eq!(resolve_session_id(&state.store, "abc-2"), Ok("abc-2".to_string()));
        assert!(resolve_session_id(&state.store, "abc").is_err());
        assert!(resolve_session_id(&state.store, "nope").is_err());
    }

    #[test]
    fn edit_targets_last_user_message() {
        let mut state = ChatState::new(Default::default(), None).expect("state");
        let mut session = Session::new("s1", None);
        session.messages.push(Message::new("u1", Role::User, "first"));
        session.messages.push(Message::new("a1", Role::Assistant, "reply"));
        session.messages.push(Message::new("u2", Role::User, "second"));
        state.store.insert_session(session);
        state.store.set_current_session(Some("s1"));

        let action =
            to_action(&state, Input::Edit("second, revised".to_string())).expect("action");
        let ChatAction::User(UserAction::EditAndResend {
            session_id,
            message_id,
            text,
        }) = action
        else {
            panic!("expected edit-and-resend");
        };
        assert_eq!(session_id, "s1");
        assert_eq!(message_id, "u2");
        assert_eq!(text, "second, revised");
    }

    #[test]
    fn rename_needs_a_current_session() {
        let state = ChatState::new(Default::default(), None).expect("state");
        assert!(to_action(&state, Input::Rename("x".to_string())).is_err());
    }

    #[test]
    fn failed_dispatch_comes_back_as_command_failed() {
        let (tx, rx) = mpsc::channel();
        let mut client = FakeClient {
            fail: true,
            ..FakeClient::default()
        };
        let effects = vec![
            ChatEffect::Dispatch(BackendCommand::SendUserMessage {
                session_id: "s1".to_string(),
                text: "hi".to_string(),
                model: None,
                provider: None,
            }),
            ChatEffect::StopStreaming {
                session_id: "s1".to_string(),
            },
        ];

        let rest = run_effects(effects, &mut client, None, &tx);
        assert_eq!(
            rest,
            vec![ChatEffect::StopStreaming {
                session_id: "s1".to_string()
            }]
        );
        let Ok(AppMessage::Action(ChatAction::Runtime(RuntimeAction::CommandFailed {
            session_id,
            command,
            ..
        }))) = rx.try_recv()
        else {
            panic!("expected a command failure");
        };
        assert_eq!(session_id, "s1");
        assert_eq!(command, CommandKind::SendUserMessage);
    }

    #[test]
    fn successful_dispatch_reaches_client() {
        let (tx, rx) = mpsc::channel();
        let mut client = FakeClient::default();
        let effects = vec![ChatEffect::Dispatch(BackendCommand::RespondApproval {
            session_id: "s1".to_string(),
            approval_id: "evt-9".to_string(),
            kind: ApprovalKind::Exec,
            decision: ApprovalDecision::Approved,
        })];
        assert!(run_effects(effects, &mut client, None, &tx).is_empty());
        assert_eq!(client.sent, vec!["evt-9".to_string()]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn deleting_a_session_closes_its_backend() {
        let (tx, rx) = mpsc::channel();
        let mut client = FakeClient::default();
        let mut state = ChatState::new(Default::default(), None).expect("state");
        let effects = reduce(
            &mut state,
            ChatAction::User(UserAction::SendMessage {
                text: "hi".to_string(),
            }),
        );
        let session_id = state
            .store
            .current_session_id()
            .expect("session")
            .to_string();
        run_effects(effects, &mut client, None, &tx);

        let effects = reduce(
            &mut state,
            ChatAction::User(UserAction::DeleteSession {
                session_id: session_id.clone(),
            }),
        );
        assert!(run_effects(effects, &mut client, None, &tx).is_empty());
        assert_eq!(client.sent, vec!["hi".to_string(), format!("close {session_id}")]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resume_lookup_without_codex_home_resolves_to_none() {
        let (tx, rx) = mpsc::channel();
        let mut client = FakeClient::default();
        let effects = vec![ChatEffect::Dispatch(BackendCommand::ResolveResumePath {
            session_id: "s1".to_string(),
            backend_session_id: "b-1".to_string(),
        })];
        run_effects(effects, &mut client, None, &tx);
        let message = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("lookup result");
        let AppMessage::Action(ChatAction::Runtime(RuntimeAction::ResumePathResolved {
            session_id,
            path,
        })) = message
        else {
            panic!("expected a resolved resume path");
        };
        assert_eq!(session_id, "s1");
        assert_eq!(path, None);
    }
}
