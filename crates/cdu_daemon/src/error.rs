use std::path::PathBuf;

use thiserror::Error;

/// Top-level startup failure. `main` logs this at `error` and exits 1;
/// nothing below this layer panics on a config/lock problem.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another instance is already running (lock file {path:?})")]
    AlreadyRunning { path: PathBuf },
    #[error("failed to acquire single-instance lock at {path:?}: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(#[from] cdu_config::ConfigError),
}
