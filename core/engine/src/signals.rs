//! Out-of-band signal files and the permission overlay.
//!
//! Hooks running inside a session write small marker files, one per session
//! and kind, named `<session-id>.<kind>.json`. Presence and content are the
//! entire protocol. Only the `permission` kind overrides machine-derived
//! status; `stop` and `ended` clear a live permission overlay, and `working`
//! is informational. Malformed files are treated as absent.

use std::collections::HashMap;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The four recognized signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Working,
    Permission,
    Stop,
    Ended,
}

impl SignalKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "working" => Some(SignalKind::Working),
            "permission" => Some(SignalKind::Permission),
            "stop" => Some(SignalKind::Stop),
            "ended" => Some(SignalKind::Ended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Working => "working",
            SignalKind::Permission => "permission",
            SignalKind::Stop => "stop",
            SignalKind::Ended => "ended",
        }
    }
}

/// An asserted pending-permission fact for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSignal {
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub timestamp: Option<String>,
}

/// On-disk signal file payload. Each kind uses its own timestamp field
/// name; the aliases accept all of them.
#[derive(Debug, Deserialize)]
struct SignalPayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(
        default,
        alias = "requested_at",
        alias = "started_at",
        alias = "stopped_at",
        alias = "ended_at"
    )]
    timestamp: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<serde_json::Value>,
}

/// Splits `<session-id>.<kind>.json` into its parts.
pub fn parse_signal_path(path: &Path) -> Option<(String, SignalKind)> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(".json")?;
    let (session_id, kind_name) = stem.rsplit_once('.')?;
    if session_id.is_empty() {
        return None;
    }
    Some((session_id.to_string(), SignalKind::from_name(kind_name)?))
}

/// Active permission overlays, keyed by session identifier.
///
/// Startup loading and live updates share [`SignalStore::apply_file`], so
/// the merge is idempotent by construction.
#[derive(Debug, Default)]
pub struct SignalStore {
    permissions: HashMap<String, PermissionSignal>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<&PermissionSignal> {
        self.permissions.get(session_id)
    }

    /// Applies a created or modified signal file. Returns the affected
    /// session id when the overlay state may have changed.
    pub fn apply_file(&mut self, path: &Path) -> Option<String> {
        let (session_id, kind) = parse_signal_path(path)?;

        let payload = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<SignalPayload>(&content) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Ignoring malformed signal file");
                    return None;
                }
            },
            // Vanished between the notification and the read: same as absent.
            Err(_) => return None,
        };

        // The payload's session id wins over the filename when both exist.
        let session_id = payload.session_id.unwrap_or(session_id);

        match kind {
            SignalKind::Permission => {
                debug!(session_id = %session_id, tool = ?payload.tool_name, "Permission signal asserted");
                self.permissions.insert(
                    session_id.clone(),
                    PermissionSignal {
                        tool_name: payload.tool_name,
                        tool_input: payload.tool_input,
                        timestamp: payload.timestamp,
                    },
                );
                Some(session_id)
            }
            SignalKind::Stop | SignalKind::Ended => {
                self.permissions.remove(&session_id).map(|_| session_id)
            }
            SignalKind::Working => None,
        }
    }

    /// Handles removal of a signal file.
    pub fn remove_file(&mut self, path: &Path) -> Option<String> {
        let (session_id, kind) = parse_signal_path(path)?;
        match kind {
            SignalKind::Permission => self.permissions.remove(&session_id).map(|_| session_id),
            _ => None,
        }
    }

    /// Clears the overlay once a tool result shows up in the transcript.
    pub fn clear_on_tool_result(&mut self, session_id: &str) -> bool {
        self.permissions.remove(session_id).is_some()
    }

    /// Loads all existing signal files. Returns affected session ids.
    pub fn load_dir(&mut self, dir: &Path) -> Vec<String> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            // Signals dir may not exist yet; sessions simply have no overlay.
            Err(_) => return Vec::new(),
        };

        let mut affected = Vec::new();
        for entry in entries.flatten() {
            if let Some(session_id) = self.apply_file(&entry.path()) {
                affected.push(session_id);
            }
        }
        affected
    }
}
