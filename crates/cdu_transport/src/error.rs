use thiserror::Error;

/// TransportError taxonomy. Never propagated as a panic — every caller
/// in this crate turns these into a `bool`/`Result` the scheduler or
/// writer can act on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectRefused(String),
    #[error("operation timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::ConnectionRefused => Self::ConnectRefused(err.to_string()),
            _ => Self::Protocol(err.to_string()),
        }
    }
}
