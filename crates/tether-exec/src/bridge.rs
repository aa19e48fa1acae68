use std::collections::HashMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::Child;
use std::process::ChildStdin;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use tether_core::ApprovalDecision;
use tether_core::ApprovalKind;

use super::codex::parse_event_line;
use super::codex::tag_event_line;
use super::codex::CodexAdapter;
use super::codex::Op;
use super::codex::Submission;
use super::contracts::BackendClient;
use super::contracts::ExecRequest;
use super::error::BackendError;

/// How long a process may linger after its output closes or after a
/// shutdown request before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(3);
const EXIT_POLL: Duration = Duration::from_millis(50);

/// What a backend process reports back, tagged with the frontend session it
/// was started for.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Line { session_id: String, raw: Value },
    Exited { session_id: String, code: Option<i32> },
}

pub type BridgeCallback = Arc<dyn Fn(BridgeEvent) + Send + Sync>;

type SharedChild = Arc<Mutex<Child>>;

struct CodexProcess {
    child: SharedChild,
    stdin: ChildStdin,
}

/// One `codex proto` process per frontend session, started lazily on the
/// first message. Output is read on background threads and handed to the
/// callback; nothing here touches chat state.
pub struct CodexBridge {
    adapter: CodexAdapter,
    cwd: PathBuf,
    processes: HashMap<String, CodexProcess>,
    on_event: BridgeCallback,
}

impl CodexBridge {
    pub fn new(adapter: CodexAdapter, cwd: PathBuf, on_event: BridgeCallback) -> Self {
        Self {
            adapter,
            cwd,
            processes: HashMap::new(),
            on_event,
        }
    }

    fn ensure_process(
        &mut self,
        session_id: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> Result<&mut CodexProcess, BackendError> {
        if !self.processes.contains_key(session_id) {
            let request = self.adapter.proto(self.cwd.clone(), model, provider);
            let process = spawn(&request, session_id, Arc::clone(&self.on_event))?;
            self.processes.insert(session_id.to_string(), process);
        }
        self.processes
            .get_mut(session_id)
            .ok_or_else(|| BackendError::NotRunning(session_id.to_string()))
    }

    fn submit(&mut self, session_id: &str, submission: &Submission) -> Result<(), BackendError> {
        let process = self
            .processes
            .get_mut(session_id)
            .ok_or_else(|| BackendError::NotRunning(session_id.to_string()))?;
        write_submission(&mut process.stdin, submission)
    }

    /// Forgets the session's process if it has exited, so the next message
    /// starts a fresh one. A live process is left alone. Never blocks.
    pub fn reap(&mut self, session_id: &str) -> bool {
        let exited = self
            .processes
            .get(session_id)
            .is_some_and(|process| match lock(&process.child).try_wait() {
                Ok(status) => status.is_some(),
                Err(err) => {
                    tracing::warn!(session_id, %err, "exit status check failed");
                    true
                }
            });
        if exited {
            self.processes.remove(session_id);
        }
        exited
    }

    /// Asks every process to shut down, then reaps it.
    pub fn shutdown(&mut self) {
        for (session_id, mut process) in self.processes.drain() {
            request_shutdown(&session_id, &mut process.stdin);
            drop(process.stdin);
            let mut child = lock(&process.child);
            if let Err(err) = child.kill() {
                tracing::debug!(session_id = session_id.as_str(), %err, "kill failed");
            }
            match child.wait() {
                Ok(status) => tracing::debug!(
                    session_id = session_id.as_str(),
                    code = ?status.code(),
                    "backend process reaped"
                ),
                Err(err) => tracing::warn!(session_id = session_id.as_str(), %err, "wait failed"),
            }
        }
    }
}

impl Drop for CodexBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BackendClient for CodexBridge {
    fn send_user_message(
        &mut self,
        session_id: &str,
        text: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> Result<(), BackendError> {
        let process = self.ensure_process(session_id, model, provider)?;
        write_submission(&mut process.stdin, &Submission::user_text(text))
    }

    fn respond_approval(
        &mut self,
        session_id: &str,
        approval_id: &str,
        kind: ApprovalKind,
        decision: ApprovalDecision,
    ) -> Result<(), BackendError> {
        self.submit(session_id, &Submission::approval(approval_id, kind, decision))
    }

    fn interrupt(&mut self, session_id: &str) -> Result<(), BackendError> {
        self.submit(session_id, &Submission::new(Op::Interrupt))
    }

    /// Detaches the session's process and retires it off the caller's thread.
    /// Closing a session that never started a process is not an error.
    fn close_session(&mut self, session_id: &str) -> Result<(), BackendError> {
        let Some(mut process) = self.processes.remove(session_id) else {
            return Ok(());
        };
        request_shutdown(session_id, &mut process.stdin);
        drop(process.stdin);
        let session_id = session_id.to_string();
        std::thread::spawn(move || {
            let code = wait_for_exit(&process.child, EXIT_GRACE);
            tracing::info!(
                session_id = session_id.as_str(),
                code = ?code,
                "backend process closed"
            );
        });
        Ok(())
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

fn request_shutdown(session_id: &str, stdin: &mut ChildStdin) {
    if let Err(err) = write_submission(stdin, &Submission::new(Op::Shutdown)) {
        tracing::debug!(session_id, %err, "shutdown submission failed");
    }
}

/// Polls until the child exits, killing it once `grace` has passed.
fn wait_for_exit(child: &Mutex<Child>, grace: Duration) -> Option<i32> {
    let started = Instant::now();
    loop {
        match lock(child).try_wait() {
            Ok(Some(status)) => return status.code(),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, "exit status check failed");
                return None;
            }
        }
        if started.elapsed() >= grace {
            let mut child = lock(child);
            if let Err(err) = child.kill() {
                tracing::debug!(%err, "kill failed");
            }
            return match child.wait() {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(%err, "wait failed");
                    None
                }
            };
        }
        std::thread::sleep(EXIT_POLL);
    }
}

fn write_submission(stdin: &mut ChildStdin, submission: &Submission) -> Result<(), BackendError> {
    let mut line = serde_json::to_string(submission)?;
    line.push('\n');
    stdin.write_all(line.as_bytes())?;
    stdin.flush()?;
    tracing::debug!(id = submission.id.as_str(), "submission written");
    Ok(())
}

fn spawn(
    request: &ExecRequest,
    session_id: &str,
    on_event: BridgeCallback,
) -> Result<CodexProcess, BackendError> {
    let program = request.program.display().to_string();
    tracing::info!(
        session_id,
        program = program.as_str(),
        cwd = %request.cwd.display(),
        "starting backend process"
    );
    let mut child = Command::new(&request.program)
        .args(&request.args)
        .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&request.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdin = child.stdin.take().ok_or_else(|| BackendError::Spawn {
        program: program.clone(),
        source: std::io::Error::other("stdin not captured"),
    })?;
    let stdout = child.stdout.take();
    if let Some(stderr) = child.stderr.take() {
        let session_id = session_id.to_string();
        std::thread::spawn(move || log_stderr(stderr, session_id));
    }
    let child = Arc::new(Mutex::new(child));
    if let Some(stdout) = stdout {
        let session_id = session_id.to_string();
        let exiting = Arc::clone(&child);
        std::thread::spawn(move || {
            forward_output(stdout, session_id, on_event, || {
                wait_for_exit(&exiting, EXIT_GRACE)
            })
        });
    }
    Ok(CodexProcess { child, stdin })
}

/// Forwards stdout as tagged lines until it closes, then reports the exit
/// code `exit_code` yields.
fn forward_output(
    stdout: impl Read,
    session_id: String,
    on_event: BridgeCallback,
    exit_code: impl FnOnce() -> Option<i32>,
) {
    let mut seq = 0u64;
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(
                    session_id = session_id.as_str(),
                    %err,
                    "backend stdout read failed"
                );
                break;
            }
        };
        if let Some(mut raw) = parse_event_line(&line) {
            seq += 1;
            tag_event_line(&mut raw, seq);
            on_event(BridgeEvent::Line {
                session_id: session_id.clone(),
                raw,
            });
        }
    }
    tracing::debug!(session_id = session_id.as_str(), "backend stdout closed");
    let code = exit_code();
    on_event(BridgeEvent::Exited { session_id, code });
}

fn log_stderr(stderr: impl Read, session_id: String) {
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        if !line.trim().is_empty() {
            tracing::warn!(
                session_id = session_id.as_str(),
                line = line.as_str(),
                "backend stderr"
            );
        }
    }
}
