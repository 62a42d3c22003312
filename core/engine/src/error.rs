//! Error types for engine operations.
//!
//! Per-session failures are isolated by the orchestrator and logged, never
//! propagated across sessions; the variants here cover the few places where
//! a caller genuinely needs to know what went wrong.

use std::path::PathBuf;

/// All errors that can occur in periscope-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Watch root missing: {}", .0.display())]
    WatchRootMissing(PathBuf),

    #[error("Failed to install filesystem watcher: {path}: {source}")]
    WatchInstall {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
