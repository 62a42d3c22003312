//! Watch daemon: runs the inference engine over the local transcript tree
//! and emits session change events as JSON lines on stdout, one per line.
//! Transports attach downstream of that stream.

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use periscope_engine::{EngineConfig, SessionEvent, WatcherHandle};

fn main() {
    init_logging();

    let config = match build_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to resolve engine configuration");
            std::process::exit(1);
        }
    };
    info!(
        projects_dir = %config.projects_dir.display(),
        signals_dir = %config.signals_dir.display(),
        "Starting watch daemon"
    );

    let (tx, rx) = mpsc::channel();
    let handle = match WatcherHandle::spawn(config, tx) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "Failed to install filesystem watcher");
            std::process::exit(1);
        }
    };

    dispatch_events(rx);

    // The event receiver is gone (stdout closed or consumer detached).
    handle.close();
}

/// Forwards each session event as one JSON line. Returns when either side
/// of the pipeline disappears.
fn dispatch_events(rx: mpsc::Receiver<SessionEvent>) {
    let stdout = std::io::stdout();
    for event in rx {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "Failed to serialize session event");
                continue;
            }
        };
        let mut out = stdout.lock();
        if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
            info!("Event consumer went away; shutting down");
            return;
        }
    }
}

fn build_config() -> periscope_engine::Result<EngineConfig> {
    let mut config = EngineConfig::from_home()?;
    if let Ok(dir) = env::var("PERISCOPE_PROJECTS_DIR") {
        config.projects_dir = PathBuf::from(dir);
    }
    if let Ok(dir) = env::var("PERISCOPE_SIGNALS_DIR") {
        config.signals_dir = PathBuf::from(dir);
    }
    Ok(config)
}

fn init_logging() {
    let debug_enabled = env::var("PERISCOPE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
