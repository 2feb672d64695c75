//! Dual-transport Modbus client: TCP primary, RTU failover, hot mode
//! switching, auto-reconnect. This crate owns the two physical clients and
//! the retrying batch I/O on top of them; scheduling *when* to read/write
//! which addresses lives in `cdu_scheduler`.

pub mod batch;
pub mod client;
pub mod error;
pub mod reconnect;
pub mod targets;

pub use batch::{BatchIo, MAX_RETRY_READ, MAX_RETRY_WRITE};
pub use client::{RtuConfig, TcpConfig, Transport, TransportManager};
pub use error::TransportError;
pub use reconnect::{ReconnectSupervisor, ReconnectTarget};
pub use targets::{RtuTarget, TcpTarget};
