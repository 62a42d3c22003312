//! Watch/debounce orchestrator.
//!
//! One thread owns the registry, the signal store, and the repo cache.
//! Filesystem notifications arrive over an internal channel; transcript
//! modifications are debounced per path, transcript and signal additions
//! and removals are handled immediately, and a periodic sweep re-evaluates
//! sessions that only a passing clock can change. Clients consume
//! [`SessionEvent`]s from an outbound channel.
//!
//! The handling methods on [`Orchestrator`] are synchronous and take an
//! explicit `now` so they can be driven directly in tests; the thread in
//! [`WatcherHandle::spawn`] is only plumbing around them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs_err as fs;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::classify::classify;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::reader::read_new_records;
use crate::record::LogRecord;
use crate::registry::{SessionRegistry, SessionState};
use crate::repo::RepoCache;
use crate::signals::SignalStore;
use crate::status::{derive_status, StatusEvent};

/// Change notification published to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Created(SessionState),
    Updated(SessionState),
    Deleted { session_id: String },
}

/// Transcript content buffered for a session that cannot be created yet
/// (no cwd or prompt observed so far). The offset still advances so the
/// same bytes are never re-parsed.
#[derive(Debug, Default)]
struct PendingLog {
    records: Vec<LogRecord>,
    offset: u64,
}

/// Owns all mutable engine state. Single-threaded by construction.
pub struct Orchestrator {
    config: EngineConfig,
    registry: SessionRegistry,
    signals: SignalStore,
    repo_cache: RepoCache,
    pending: HashMap<PathBuf, PendingLog>,
    events: mpsc::Sender<SessionEvent>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            signals: SignalStore::new(),
            repo_cache: RepoCache::new(),
            pending: HashMap::new(),
            events,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// One-time startup pass over transcripts and signal files already on
    /// disk, routed through the same handlers as live notifications.
    pub fn scan_existing(&mut self, now: DateTime<Utc>) {
        let signals_dir = self.config.signals_dir.clone();
        for session_id in self.signals.load_dir(&signals_dir) {
            self.sync_overlay(&session_id);
        }

        let projects_dir = self.config.projects_dir.clone();
        let transcripts: Vec<PathBuf> = WalkDir::new(&projects_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_transcript(path))
            .collect();
        info!(count = transcripts.len(), "Scanning existing transcripts");
        for path in transcripts {
            self.handle_log_change(&path, now);
        }
    }

    /// Reads new transcript content and republishes the session if anything
    /// meaningful changed. A failure here affects only this session.
    pub fn handle_log_change(&mut self, path: &Path, now: DateTime<Utc>) {
        let Some(session_id) = session_id_from_path(path) else {
            return;
        };

        let offset = self
            .registry
            .get(&session_id)
            .map(|session| session.offset)
            .or_else(|| self.pending.get(path).map(|pending| pending.offset))
            .unwrap_or(0);

        let batch = match read_new_records(path, offset) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                // File vanished: the session, if any, ended.
                self.handle_log_removal(path);
                return;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read transcript");
                return;
            }
        };

        // Any tool result in the transcript supersedes a permission signal
        // the hook never got to clean up.
        let saw_tool_result = batch
            .records
            .iter()
            .any(|record| matches!(classify(record), Some(StatusEvent::ToolResult { .. })));
        if saw_tool_result && self.signals.clear_on_tool_result(&session_id) {
            debug!(session_id = %session_id, "Tool result cleared stale permission signal");
        }

        if self.registry.get(&session_id).is_some() {
            self.update_session(&session_id, batch.records, batch.offset, now);
        } else {
            self.create_session(&session_id, path, batch.records, batch.offset, now);
        }
    }

    /// Drops the session for a deleted transcript, if one existed.
    pub fn handle_log_removal(&mut self, path: &Path) {
        self.pending.remove(path);
        let Some(session_id) = self.registry.session_id_for_path(path) else {
            return;
        };
        self.registry.remove(&session_id);
        info!(session_id = %session_id, "Session transcript removed");
        self.publish(SessionEvent::Deleted { session_id });
    }

    /// Applies a created or modified signal file to the overlay.
    pub fn handle_signal_change(&mut self, path: &Path) {
        if let Some(session_id) = self.signals.apply_file(path) {
            self.sync_overlay(&session_id);
        }
    }

    /// Applies a signal file removal to the overlay.
    pub fn handle_signal_removal(&mut self, path: &Path) {
        if let Some(session_id) = self.signals.remove_file(path) {
            self.sync_overlay(&session_id);
        }
    }

    /// Re-evaluates sessions currently projecting `working`; only those can
    /// change status with no new input, via the synthetic timeouts.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        for session_id in self.registry.working_session_ids() {
            self.update_session(&session_id, Vec::new(), u64::MAX, now);
        }
    }

    fn create_session(
        &mut self,
        session_id: &str,
        path: &Path,
        new_records: Vec<LogRecord>,
        offset: u64,
        now: DateTime<Utc>,
    ) {
        let pending = self.pending.entry(path.to_path_buf()).or_default();
        pending.records.extend(new_records);
        pending.offset = offset;

        let Some(mut session) = SessionState::try_create(
            session_id.to_string(),
            path.to_path_buf(),
            std::mem::take(&mut pending.records),
            pending.offset,
        ) else {
            // Not enough metadata yet; keep buffering.
            return;
        };
        self.pending.remove(path);

        let repo = self.repo_cache.lookup(Path::new(&session.cwd));
        if session.git_branch.is_none() {
            session.git_branch = repo.branch;
        }
        session.repo_url = repo.repo_url;
        session.repo_id = repo.repo_id;
        session.snapshot = derive_status(&session.records, now, &self.config.thresholds);
        session.pending_permission = self.signals.get(session_id).cloned();

        info!(session_id = %session_id, cwd = %session.cwd, "Session discovered");
        self.publish(SessionEvent::Created(session.clone()));
        self.registry.upsert(session);
    }

    fn update_session(
        &mut self,
        session_id: &str,
        new_records: Vec<LogRecord>,
        offset: u64,
        now: DateTime<Utc>,
    ) {
        // Branch changes are detected before the overlay merge so the
        // published event carries consistent repo facts.
        let new_branch = new_records
            .iter()
            .rev()
            .find_map(|record| record.meta().git_branch.clone());

        let Some(session) = self.registry.get_mut(session_id) else {
            return;
        };
        let before = (
            session.status(),
            session.snapshot.context.message_count,
            session.git_branch.clone(),
        );

        session.records.extend(new_records);
        if offset != u64::MAX {
            session.offset = offset;
        }

        let cwd = PathBuf::from(&session.cwd);
        if let Some(branch) = new_branch {
            if session.git_branch.as_deref() != Some(branch.as_str()) {
                session.git_branch = Some(branch);
                self.repo_cache.invalidate(&cwd);
            }
        }
        let repo = self.repo_cache.lookup(&cwd);
        let session = self
            .registry
            .get_mut(session_id)
            .expect("session checked above");
        session.repo_url = repo.repo_url;
        session.repo_id = repo.repo_id;

        session.snapshot = derive_status(&session.records, now, &self.config.thresholds);
        session.pending_permission = self.signals.get(session_id).cloned();

        let after = (
            session.status(),
            session.snapshot.context.message_count,
            session.git_branch.clone(),
        );
        if before != after {
            let event = SessionEvent::Updated(session.clone());
            self.publish(event);
        }
    }

    /// Re-applies the overlay for one session after a signal change.
    fn sync_overlay(&mut self, session_id: &str) {
        let overlay = self.signals.get(session_id).cloned();
        let Some(session) = self.registry.get_mut(session_id) else {
            return;
        };
        let before = session.status();
        session.pending_permission = overlay;
        if session.status() != before {
            let event = SessionEvent::Updated(session.clone());
            self.publish(event);
        }
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped; discarding session event");
        }
    }
}

fn is_transcript(path: &Path) -> bool {
    path.extension().map(|ext| ext == "jsonl").unwrap_or(false)
}

fn session_id_from_path(path: &Path) -> Option<String> {
    if !is_transcript(path) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

enum Input {
    Fs(Event),
    Shutdown,
}

/// Running watcher thread plus its shutdown handle.
pub struct WatcherHandle {
    control: mpsc::Sender<Input>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Installs filesystem watchers and starts the orchestrator thread.
    ///
    /// Watch installation failure is the one error worth dying for; after
    /// it everything would silently stay stale.
    pub fn spawn(config: EngineConfig, events: mpsc::Sender<SessionEvent>) -> Result<Self> {
        if !config.projects_dir.is_dir() {
            return Err(EngineError::WatchRootMissing(config.projects_dir.clone()));
        }
        fs::create_dir_all(&config.signals_dir).map_err(|source| EngineError::Io {
            context: format!("creating signals dir {}", config.signals_dir.display()),
            source,
        })?;

        let (input_tx, input_rx) = mpsc::channel();
        let fs_tx = input_tx.clone();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let _ = fs_tx.send(Input::Fs(event));
                    }
                    Err(err) => error!(error = %err, "Watch error"),
                }
            })
            .map_err(|source| EngineError::WatchInstall {
                path: config.projects_dir.clone(),
                source,
            })?;

        watcher
            .watch(&config.projects_dir, RecursiveMode::Recursive)
            .map_err(|source| EngineError::WatchInstall {
                path: config.projects_dir.clone(),
                source,
            })?;
        watcher
            .watch(&config.signals_dir, RecursiveMode::NonRecursive)
            .map_err(|source| EngineError::WatchInstall {
                path: config.signals_dir.clone(),
                source,
            })?;

        let mut orchestrator = Orchestrator::new(config.clone(), events);
        let thread = std::thread::Builder::new()
            .name("periscope-watch".to_string())
            .spawn(move || {
                // The watcher must live as long as the loop.
                let _watcher = watcher;
                run_loop(&mut orchestrator, input_rx, &config);
            })
            .map_err(|source| EngineError::Io {
                context: "spawning watcher thread".to_string(),
                source,
            })?;

        Ok(Self {
            control: input_tx,
            thread: Some(thread),
        })
    }

    /// Stops the orchestrator thread and waits for it to exit.
    pub fn close(mut self) {
        let _ = self.control.send(Input::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop(orchestrator: &mut Orchestrator, input_rx: mpsc::Receiver<Input>, config: &EngineConfig) {
    orchestrator.scan_existing(Utc::now());

    let mut debounce: HashMap<PathBuf, Instant> = HashMap::new();
    let mut next_sweep = Instant::now() + config.sweep_interval;

    loop {
        let now = Instant::now();
        let wake = debounce
            .values()
            .min()
            .copied()
            .unwrap_or(next_sweep)
            .min(next_sweep);
        let wait = wake.saturating_duration_since(now);

        match input_rx.recv_timeout(wait.max(Duration::from_millis(1))) {
            Ok(Input::Shutdown) => break,
            Ok(Input::Fs(event)) => route_event(orchestrator, &mut debounce, config, event),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let due: Vec<PathBuf> = debounce
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            debounce.remove(&path);
            orchestrator.handle_log_change(&path, Utc::now());
        }

        if now >= next_sweep {
            orchestrator.sweep(Utc::now());
            next_sweep = now + config.sweep_interval;
        }
    }
    debug!("Watcher loop stopped");
}

fn route_event(
    orchestrator: &mut Orchestrator,
    debounce: &mut HashMap<PathBuf, Instant>,
    config: &EngineConfig,
    event: Event,
) {
    for path in &event.paths {
        if path.starts_with(&config.signals_dir) {
            match event.kind {
                EventKind::Remove(_) => orchestrator.handle_signal_removal(path),
                EventKind::Create(_) | EventKind::Modify(_) => {
                    orchestrator.handle_signal_change(path)
                }
                _ => {}
            }
            continue;
        }

        if !is_transcript(path) {
            continue;
        }
        match event.kind {
            // New transcripts bypass the debounce so sessions appear fast.
            EventKind::Create(_) => {
                debounce.remove(path);
                orchestrator.handle_log_change(path, Utc::now());
            }
            // A notification for a file already pending resets its timer.
            EventKind::Modify(_) => {
                debounce.insert(path.clone(), Instant::now() + config.debounce);
            }
            EventKind::Remove(_) => {
                debounce.remove(path);
                orchestrator.handle_log_removal(path);
            }
            _ => {}
        }
    }
}
