//! Engine configuration: watched roots, debounce window, sweep cadence, and
//! the timeout thresholds the status machine uses to compensate for sessions
//! that never write an explicit turn-end marker.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Debounce window for coalescing repeated change notifications per file.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Interval of the staleness sweep over sessions currently `working`.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// No activity for this long means the session has gone idle.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A pending tool use unanswered for this long suggests an approval prompt.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A working session with no pending tools and no writes for this long has
/// silently finished its turn.
pub const STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout thresholds consulted when deriving status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub idle: Duration,
    pub approval: Duration,
    pub stale: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            idle: IDLE_TIMEOUT,
            approval: APPROVAL_TIMEOUT,
            stale: STALE_TIMEOUT,
        }
    }
}

/// Configuration for the inference engine and its orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the per-project transcript tree (`~/.claude/projects`).
    pub projects_dir: PathBuf,
    /// Directory of out-of-band signal files.
    pub signals_dir: PathBuf,
    pub debounce: Duration,
    pub sweep_interval: Duration,
    pub thresholds: Thresholds,
}

impl EngineConfig {
    /// Builds a config rooted at the default Claude directory layout.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(EngineError::HomeDirNotFound)?;
        let claude = home.join(".claude");
        Ok(Self::with_roots(
            claude.join("projects"),
            claude.join("periscope").join("signals"),
        ))
    }

    /// Builds a config with explicit roots and default timings.
    pub fn with_roots(projects_dir: PathBuf, signals_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            signals_dir,
            debounce: DEFAULT_DEBOUNCE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            thresholds: Thresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_documented_values() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.idle, Duration::from_secs(300));
        assert_eq!(thresholds.approval, Duration::from_secs(5));
        assert_eq!(thresholds.stale, Duration::from_secs(60));
    }

    #[test]
    fn with_roots_uses_default_timings() {
        let config = EngineConfig::with_roots(PathBuf::from("/p"), PathBuf::from("/s"));
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }
}
