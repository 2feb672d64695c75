use thiserror::Error;

/// Reasons a write request never reaches the queue. Returned synchronously
/// from `operate_component`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskRejection {
    #[error("communication offline, reject new write task")]
    CommunicationOffline,
    #[error("component disabled: {0}")]
    ComponentDisabled(String),
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    #[error("no writable field matched the requested keys")]
    NoWritableField,
    #[error("value unchanged since last write, skipped")]
    SkipUnchanged,
}

/// A fault that escalates out of the auto-control loop and stops it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlFault {
    #[error("pump startup did not reach ready within the 30 s timeout")]
    PumpStartupTimeout,
}
