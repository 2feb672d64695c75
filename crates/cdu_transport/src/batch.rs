use std::time::Duration;

use tokio_modbus::client::{Reader, Writer};

use crate::client::{Transport, TransportManager};
use crate::error::TransportError;

/// Retry budget for polling reads: up to 3 attempts before giving
/// the last error back to the scheduler.
pub const MAX_RETRY_READ: u8 = 3;
/// Fast-fail budget for writes and anything over TCP: 1 attempt.
pub const MAX_RETRY_WRITE: u8 = 1;

/// Stateless batch Modbus I/O over whichever client `transport` selects.
/// Every operation here is read-then-decide: on `Err` the caller's register
/// map must not be touched, which is true by construction because these
/// functions never see the map.
pub struct BatchIo;

impl BatchIo {
    pub fn read_holding_registers(
        manager: &TransportManager,
        transport: Transport,
        start: u16,
        count: u16,
        max_retry: u8,
    ) -> Result<Vec<u16>, TransportError> {
        Self::retrying(manager, transport, max_retry, |ctx, rt, timeout| {
            rt.block_on(async {
                tokio::time::timeout(timeout, ctx.read_holding_registers(start, count))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(TransportError::from_io)?
                    .map_err(|e| TransportError::Protocol(format!("exception: {e:?}")))
            })
        })
    }

    pub fn read_coils(
        manager: &TransportManager,
        transport: Transport,
        start: u16,
        count: u16,
        max_retry: u8,
    ) -> Result<Vec<bool>, TransportError> {
        Self::retrying(manager, transport, max_retry, |ctx, rt, timeout| {
            rt.block_on(async {
                tokio::time::timeout(timeout, ctx.read_coils(start, count))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(TransportError::from_io)?
                    .map_err(|e| TransportError::Protocol(format!("exception: {e:?}")))
            })
        })
    }

    pub fn write_registers(
        manager: &TransportManager,
        transport: Transport,
        start: u16,
        values: &[u16],
        max_retry: u8,
    ) -> Result<(), TransportError> {
        Self::retrying(manager, transport, max_retry, |ctx, rt, timeout| {
            rt.block_on(async {
                tokio::time::timeout(timeout, ctx.write_multiple_registers(start, values))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(TransportError::from_io)?
                    .map_err(|e| TransportError::Protocol(format!("exception: {e:?}")))
            })
        })
    }

    pub fn write_coils(
        manager: &TransportManager,
        transport: Transport,
        start: u16,
        values: &[bool],
        max_retry: u8,
    ) -> Result<(), TransportError> {
        Self::retrying(manager, transport, max_retry, |ctx, rt, timeout| {
            rt.block_on(async {
                tokio::time::timeout(timeout, ctx.write_multiple_coils(start, values))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(TransportError::from_io)?
                    .map_err(|e| TransportError::Protocol(format!("exception: {e:?}")))
            })
        })
    }

    fn retrying<T>(
        manager: &TransportManager,
        transport: Transport,
        max_retry: u8,
        mut op: impl FnMut(
            &mut tokio_modbus::client::Context,
            &tokio::runtime::Runtime,
            Duration,
        ) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let client = manager.client(transport);
        let timeout = manager.op_timeout(transport);
        let attempts = max_retry.max(1);
        let mut last_err = TransportError::Closed;
        for attempt in 0..attempts {
            match client.with_context(|ctx, rt| op(ctx, rt, timeout)) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    log::warn!("modbus op attempt {}/{attempts} failed: {e}", attempt + 1);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
