//! End-to-end scenario tests driving the orchestrator handlers directly,
//! with a controlled clock and tempdir fixtures.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use fs_err as fs;
use periscope_engine::{
    derive_status, read_new_records, EngineConfig, Orchestrator, SessionEvent, Status, Thresholds,
};
use tempfile::TempDir;

const PROMPT_LINE: &str = r#"{"type":"user","timestamp":"2026-02-01T10:00:00Z","sessionId":"s1","cwd":"/repo","gitBranch":"main","message":{"content":"fix the bug"}}"#;
const EDIT_TOOL_LINE: &str = r#"{"type":"assistant","timestamp":"2026-02-01T10:00:02Z","message":{"content":[{"type":"tool_use","id":"toolu_edit","name":"Edit","input":{"file_path":"src/lib.rs"}}]}}"#;
const EDIT_RESULT_LINE: &str = r#"{"type":"user","timestamp":"2026-02-01T10:00:04Z","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_edit"}]}}"#;
const TURN_END_LINE: &str =
    r#"{"type":"system","subtype":"turn_duration","timestamp":"2026-02-01T10:00:05Z"}"#;

struct Fixture {
    _tmp: TempDir,
    orchestrator: Orchestrator,
    rx: mpsc::Receiver<SessionEvent>,
    log_path: PathBuf,
    signals_dir: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().expect("temp dir");
    let projects = tmp.path().join("projects");
    let signals = tmp.path().join("signals");
    fs::create_dir_all(projects.join("-repo")).expect("projects dir");
    fs::create_dir_all(&signals).expect("signals dir");

    let log_path = projects.join("-repo/s1.jsonl");
    let config = EngineConfig::with_roots(projects, signals.clone());
    let (tx, rx) = mpsc::channel();
    Fixture {
        _tmp: tmp,
        orchestrator: Orchestrator::new(config, tx),
        rx,
        log_path,
        signals_dir: signals,
    }
}

fn write_lines(path: &Path, lines: &[&str]) {
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    fs::write(path, content).expect("write transcript");
}

fn ts(secs: i64) -> DateTime<Utc> {
    "2026-02-01T10:00:00Z"
        .parse::<DateTime<Utc>>()
        .expect("base time")
        + chrono::Duration::seconds(secs)
}

fn latest_session(rx: &mpsc::Receiver<SessionEvent>) -> periscope_engine::SessionState {
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            SessionEvent::Created(session) | SessionEvent::Updated(session) => {
                last = Some(session);
            }
            SessionEvent::Deleted { .. } => panic!("unexpected deletion"),
        }
    }
    last.expect("at least one session event")
}

#[test]
fn empty_log_creates_no_session() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[]);

    fx.orchestrator.handle_log_change(&fx.log_path, ts(0));

    assert!(fx.rx.try_recv().is_err());
    assert!(fx.orchestrator.registry().is_empty());
}

#[test]
fn single_prompt_creates_working_session() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE]);

    fx.orchestrator.handle_log_change(&fx.log_path, ts(1));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Working);
    assert_eq!(session.snapshot.context.message_count, 1);
    assert_eq!(session.first_prompt, "fix the bug");
}

#[test]
fn tool_use_keeps_working_with_pending_tool() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE]);

    fx.orchestrator.handle_log_change(&fx.log_path, ts(3));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Working);
    assert!(session.has_pending_tool_use());
    assert!(session
        .snapshot
        .context
        .pending_tool_ids
        .contains("toolu_edit"));
}

#[test]
fn silent_pending_tool_trips_approval_timeout() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE]);
    fx.orchestrator.handle_log_change(&fx.log_path, ts(3));
    latest_session(&fx.rx);

    // Six seconds after the tool use, with nothing new in the log.
    fx.orchestrator.sweep(ts(8));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Waiting);
    assert!(session.has_pending_tool_use());
}

#[test]
fn tool_result_resolves_pending_tool() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE]);

    fx.orchestrator.handle_log_change(&fx.log_path, ts(4));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Working);
    assert!(!session.has_pending_tool_use());
}

#[test]
fn turn_end_moves_to_waiting_for_input() {
    let mut fx = fixture();
    write_lines(
        &fx.log_path,
        &[PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE, TURN_END_LINE],
    );

    fx.orchestrator.handle_log_change(&fx.log_path, ts(5));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Waiting);
    assert!(!session.has_pending_tool_use());
}

#[test]
fn replay_is_deterministic() {
    let mut fx = fixture();
    write_lines(
        &fx.log_path,
        &[PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE, TURN_END_LINE],
    );

    let batch = read_new_records(&fx.log_path, 0)
        .expect("read")
        .expect("file exists");
    let thresholds = Thresholds::default();
    let first = derive_status(&batch.records, ts(5), &thresholds);
    let second = derive_status(&batch.records, ts(5), &thresholds);
    assert_eq!(first.state, second.state);
    assert_eq!(first.context, second.context);

    // And the orchestrator's view of the same records agrees.
    fx.orchestrator.handle_log_change(&fx.log_path, ts(5));
    let session = latest_session(&fx.rx);
    assert_eq!(session.snapshot.state, first.state);
    assert_eq!(session.snapshot.context, first.context);
}

#[test]
fn incremental_reads_keep_offsets_monotonic() {
    let fx = fixture();
    let lines = [PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE, TURN_END_LINE];

    let mut offset = 0u64;
    let mut collected = Vec::new();
    for n in 1..=lines.len() {
        write_lines(&fx.log_path, &lines[..n]);
        let batch = read_new_records(&fx.log_path, offset)
            .expect("read")
            .expect("file exists");
        assert!(batch.offset >= offset, "offset went backwards at step {n}");
        offset = batch.offset;
        collected.extend(batch.records);
    }

    let one_pass = read_new_records(&fx.log_path, 0)
        .expect("read")
        .expect("file exists");
    assert_eq!(collected, one_pass.records);
    assert_eq!(offset, one_pass.offset);
}

#[test]
fn pending_flag_tracks_pending_set() {
    let fx = fixture();
    let lines = [PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE, TURN_END_LINE];
    write_lines(&fx.log_path, &lines);

    let batch = read_new_records(&fx.log_path, 0)
        .expect("read")
        .expect("file exists");
    let thresholds = Thresholds::default();

    // The invariant holds at every prefix of the history.
    for n in 0..=batch.records.len() {
        let snapshot = derive_status(&batch.records[..n], ts(5), &thresholds);
        assert_eq!(
            snapshot.context.has_pending_tool_use,
            !snapshot.context.pending_tool_ids.is_empty(),
            "prefix of {n} records"
        );
    }
}

#[test]
fn overlay_assert_then_clear_leaves_no_trace() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE]);
    fx.orchestrator.handle_log_change(&fx.log_path, ts(3));
    latest_session(&fx.rx);

    let signal = fx.signals_dir.join("s1.permission.json");
    fs::write(&signal, r#"{"session_id":"s1","tool_name":"Edit"}"#).expect("signal");
    fx.orchestrator.handle_signal_change(&signal);
    assert_eq!(latest_session(&fx.rx).status(), Status::Waiting);

    // The matching tool result lands in the transcript; the hook's signal
    // file is cleared by observation, then removed from disk too.
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE]);
    fx.orchestrator.handle_log_change(&fx.log_path, ts(4));
    fs::remove_file(&signal).expect("remove signal");
    fx.orchestrator.handle_signal_removal(&signal);

    let session = fx
        .orchestrator
        .registry()
        .get("s1")
        .expect("session")
        .clone();
    assert!(session.pending_permission.is_none());

    // Same end state as a run where the overlay never existed.
    let mut control = fixture();
    write_lines(
        &control.log_path,
        &[PROMPT_LINE, EDIT_TOOL_LINE, EDIT_RESULT_LINE],
    );
    control.orchestrator.handle_log_change(&control.log_path, ts(4));
    let expected = latest_session(&control.rx);
    assert_eq!(session.status(), expected.status());
    assert_eq!(session.snapshot.state, expected.snapshot.state);
    assert_eq!(session.snapshot.context, expected.snapshot.context);
}

#[test]
fn idle_timeout_outranks_approval_timeout() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE, EDIT_TOOL_LINE]);
    fx.orchestrator.handle_log_change(&fx.log_path, ts(3));
    latest_session(&fx.rx);

    // Six minutes later, pending tool or not, the session is idle.
    fx.orchestrator.sweep(ts(6 * 60 + 2));

    let session = latest_session(&fx.rx);
    assert_eq!(session.status(), Status::Idle);
}

#[test]
fn sessions_fail_independently() {
    let mut fx = fixture();
    write_lines(&fx.log_path, &[PROMPT_LINE]);
    fx.orchestrator.handle_log_change(&fx.log_path, ts(1));
    latest_session(&fx.rx);

    // A second transcript that is pure garbage must not disturb the first.
    let bad_path = fx.log_path.with_file_name("s2.jsonl");
    write_lines(&bad_path, &["{broken", "also broken"]);
    fx.orchestrator.handle_log_change(&bad_path, ts(2));

    assert_eq!(fx.orchestrator.registry().len(), 1);
    assert_eq!(
        fx.orchestrator.registry().get("s1").expect("s1").status(),
        Status::Working
    );
}
