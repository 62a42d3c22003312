//! Session registry: the single owner of truth for what has been observed.
//!
//! All mutation flows through the orchestrator thread; the registry itself
//! is a plain map with no interior synchronization. A session only exists
//! once enough transcript content has arrived to establish its working
//! directory and originating prompt — no partial session is ever published.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::LogRecord;
use crate::signals::PermissionSignal;
use crate::status::{Status, StatusContext, StatusSnapshot, StatusState};

/// Per-session aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub log_path: PathBuf,
    /// Name of the encoded per-project directory the transcript lives in.
    pub project_dir: String,
    pub cwd: String,
    pub git_branch: Option<String>,
    pub first_prompt: String,
    pub started_at: Option<DateTime<Utc>>,
    /// Accumulated records, in file order. Not serialized; consumers get
    /// the derived fields.
    #[serde(skip)]
    pub records: Vec<LogRecord>,
    /// Byte offset of transcript content parsed so far.
    pub offset: u64,
    pub snapshot: StatusSnapshot,
    /// Externally-signalled permission override, if a signal file is live.
    pub pending_permission: Option<PermissionSignal>,
    pub repo_url: Option<String>,
    pub repo_id: Option<String>,
}

impl SessionState {
    /// Builds a session from its first batch of records, or `None` while
    /// the transcript cannot yet supply a working directory and prompt.
    pub fn try_create(
        session_id: String,
        log_path: PathBuf,
        records: Vec<LogRecord>,
        offset: u64,
    ) -> Option<Self> {
        let cwd = records
            .iter()
            .find_map(|record| record.meta().cwd.clone())?;
        let first_prompt = records
            .iter()
            .find_map(|record| record.prompt_text().map(str::to_string))?;
        let started_at = records.iter().find_map(|record| record.timestamp());
        let git_branch = records
            .iter()
            .find_map(|record| record.meta().git_branch.clone());
        let project_dir = log_path
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Some(Self {
            session_id,
            log_path,
            project_dir,
            cwd,
            git_branch,
            first_prompt,
            started_at,
            records,
            offset,
            snapshot: StatusSnapshot {
                state: StatusState::WaitingForInput,
                context: StatusContext::default(),
            },
            pending_permission: None,
            repo_url: None,
            repo_id: None,
        })
    }

    /// External status with the permission overlay applied.
    pub fn status(&self) -> Status {
        if self.pending_permission.is_some() {
            Status::Waiting
        } else {
            self.snapshot.status()
        }
    }

    /// Whether a tool use is outstanding, overlay included.
    pub fn has_pending_tool_use(&self) -> bool {
        self.pending_permission.is_some() || self.snapshot.context.has_pending_tool_use
    }
}

/// In-memory map of session identifier to session state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(session_id)
    }

    /// Snapshot of all sessions, for consumers that need full state.
    pub fn get_all(&self) -> Vec<SessionState> {
        self.sessions.values().cloned().collect()
    }

    pub fn upsert(&mut self, session: SessionState) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id)
    }

    pub fn session_id_for_path(&self, path: &Path) -> Option<String> {
        self.sessions
            .values()
            .find(|session| session.log_path == path)
            .map(|session| session.session_id.clone())
    }

    /// Session ids currently projecting `working`, for the staleness sweep.
    pub fn working_session_ids(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|session| session.status() == Status::Working)
            .map(|session| session.session_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
