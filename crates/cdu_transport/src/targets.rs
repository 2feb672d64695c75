use std::sync::Arc;

use crate::client::TransportManager;
use crate::error::TransportError;
use crate::reconnect::ReconnectTarget;

/// Binds a [`crate::reconnect::ReconnectSupervisor`] to the TCP client of a
/// shared `TransportManager`.
pub struct TcpTarget(pub Arc<TransportManager>);

impl ReconnectTarget for TcpTarget {
    fn connect(&self) -> Result<bool, TransportError> {
        self.0.connect_tcp()
    }

    fn disconnect(&self) {
        self.0.force_close_tcp();
    }
}

/// Binds a [`crate::reconnect::ReconnectSupervisor`] to the RTU client of a
/// shared `TransportManager`.
pub struct RtuTarget(pub Arc<TransportManager>);

impl ReconnectTarget for RtuTarget {
    fn connect(&self) -> Result<bool, TransportError> {
        self.0.connect_rtu()
    }

    fn disconnect(&self) {
        self.0.force_close_rtu();
    }
}
