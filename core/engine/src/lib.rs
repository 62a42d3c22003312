//! # periscope-engine
//!
//! Infers the live activity state of Claude Code sessions by tailing their
//! append-only JSONL transcripts and merging optional hook-written signal
//! files, then keeps that state current as the logs grow.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. One orchestrator thread
//!   owns all session state; clients consume a channel of change events.
//! - **Rebuild, don't persist**: Status is replayed from the full transcript
//!   on every re-evaluation. Nothing derived is written to disk.
//! - **Graceful degradation**: Vanished files, malformed lines, and broken
//!   signal files degrade to "no new data", never to a crash.
//! - **Isolation**: A failure processing one session never affects another.

pub mod classify;
pub mod config;
pub mod error;
pub mod reader;
pub mod record;
pub mod registry;
pub mod repo;
pub mod signals;
pub mod status;
pub mod watcher;

pub use classify::classify;
pub use config::{EngineConfig, Thresholds};
pub use error::{EngineError, Result};
pub use reader::{read_new_records, ReadBatch};
pub use record::LogRecord;
pub use registry::{SessionRegistry, SessionState};
pub use repo::{RepoCache, RepoInfo};
pub use signals::{PermissionSignal, SignalKind, SignalStore};
pub use status::{derive_status, Status, StatusContext, StatusEvent, StatusSnapshot, StatusState};
pub use watcher::{Orchestrator, SessionEvent, WatcherHandle};
