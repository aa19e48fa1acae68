use std::path::PathBuf;

use super::*;
use crate::event::ExecCommandBeginEvent;
use crate::event::ExecCommandEndEvent;
use pretty_assertions::assert_eq;

fn begin(command: &[&str]) -> EventMsg {
    EventMsg::ExecCommandBegin(ExecCommandBeginEvent {
        call_id: "call-1".to_string(),
        command: command.iter().map(|part| part.to_string()).collect(),
        cwd: PathBuf::from("/repo"),
    })
}

fn end(exit_code: i32, stdout: &str, stderr: &str) -> EventMsg {
    EventMsg::ExecCommandEnd(ExecCommandEndEvent {
        call_id: "call-1".to_string(),
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    })
}

#[test]
fn successful_command_updates_its_entry_in_place() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver(&mut state, "e1", &session, begin(&["ls"]));

    let entries = messages(&state, &session);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title.as_deref(), Some("ls"));
    assert_eq!(entries[0].content, "/repo");

    deliver(
        &mut state,
        "e2",
        &session,
        EventMsg::ExecCommandOutputDelta(EmptyEvent::default()),
    );
    deliver(&mut state, "e3", &session, end(0, "a.txt\n", ""));

    let entries = messages(&state, &session);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message_type, Some(MessageType::ExecCommand));
    assert_eq!(entries[0].title.as_deref(), Some("✓ ls"));
    assert_eq!(entries[0].content, "```\na.txt\n```");
    assert_eq!(
        state
            .subscriptions
            .get(&session)
            .and_then(|subscription| subscription.reducer().exec_target()),
        None
    );
}

#[test]
fn failed_command_reports_exit_code_and_stderr() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver(&mut state, "e1", &session, begin(&["cat", "missing"]));
    deliver(
        &mut state,
        "e2",
        &session,
        end(1, "", "cat: missing: No such file or directory\n"),
    );

    let entries = messages(&state, &session);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title.as_deref(), Some("✗ cat missing (exit 1)"));
    assert_eq!(
        entries[0].content,
        "```\n\n```\n\n```\ncat: missing: No such file or directory\n```"
    );
}

#[test]
fn end_without_begin_is_ignored() {
    let mut state = state();
    let session = open_session(&mut state);
    deliver(&mut state, "e1", &session, end(0, "orphan", ""));
    assert!(messages(&state, &session).is_empty());

    deliver(&mut state, "e2", &session, begin(&["pwd"]));
    deliver(&mut state, "e3", &session, end(0, "/repo\n", ""));
    deliver(&mut state, "e4", &session, end(0, "again", ""));
    let entries = messages(&state, &session);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "```\n/repo\n```");
}
