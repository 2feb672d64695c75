use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::slave::Slave;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub slave: u8,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            slave: 1,
            connect_timeout: Duration::from_millis(300),
            op_timeout: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtuConfig {
    pub port: String,
    pub baud_rate: u32,
    pub bytesize: u8,
    pub parity: char,
    pub stopbits: u8,
    pub slave: u8,
    pub timeout: Duration,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            bytesize: 8,
            parity: 'N',
            stopbits: 1,
            slave: 1,
            timeout: Duration::from_millis(200),
        }
    }
}

/// Which client a piece of I/O should go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Rtu,
}

/// One Modbus client plus the dedicated runtime it's driven from, behind a
/// single mutex. The mutex is the only synchronization primitive: holding
/// it while calling `close()` is what lets the mode-watchdog forcibly
/// unblock a worker parked inside a blocking read on another thread.
pub(crate) struct ClientState {
    ctx: Mutex<Option<Context>>,
    rt: Runtime,
    connected: AtomicBool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            ctx: Mutex::new(None),
            rt: Runtime::new().expect("failed to start per-client tokio runtime"),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Forcibly tears down the underlying socket/serial handle and flips
    /// `connected` to false, atomically under the client's mutex. Safe to
    /// call from any thread, including one that isn't presently reading.
    pub(crate) fn force_close(&self) {
        let mut guard = self.ctx.lock().unwrap();
        *guard = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    pub(crate) fn with_context<T>(
        &self,
        f: impl FnOnce(&mut Context, &Runtime) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut guard = self.ctx.lock().unwrap();
        match guard.as_mut() {
            Some(ctx) => {
                let result = f(ctx, &self.rt);
                if result.is_err() {
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                }
                result
            }
            None => Err(TransportError::Closed),
        }
    }
}

/// Owns the two independent Modbus clients: TCP primary,
/// RTU failover. `connect_*` never panics; a soft connect failure is
/// reported as `Ok(false)`, leaving the caller to poll `is_connected_*`.
pub struct TransportManager {
    pub(crate) tcp: ClientState,
    pub(crate) rtu: ClientState,
    tcp_config: TcpConfig,
    rtu_config: RtuConfig,
}

impl TransportManager {
    pub fn new(tcp_config: TcpConfig, rtu_config: RtuConfig) -> Self {
        Self {
            tcp: ClientState::new(),
            rtu: ClientState::new(),
            tcp_config,
            rtu_config,
        }
    }

    pub fn is_connected_tcp(&self) -> bool {
        self.tcp.is_connected()
    }

    pub fn is_connected_rtu(&self) -> bool {
        self.rtu.is_connected()
    }

    /// Preference order: TCP if healthy, else RTU, else none.
    pub fn current_client(&self) -> Option<Transport> {
        if self.is_connected_tcp() {
            Some(Transport::Tcp)
        } else if self.is_connected_rtu() {
            Some(Transport::Rtu)
        } else {
            None
        }
    }

    pub fn connect_tcp(&self) -> Result<bool, TransportError> {
        if self.is_connected_tcp() {
            return Ok(true);
        }
        let addr: SocketAddr = match format!("{}:{}", self.tcp_config.host, self.tcp_config.port).parse() {
            Ok(a) => a,
            Err(e) => return Err(TransportError::Protocol(e.to_string())),
        };
        let slave = Slave(self.tcp_config.slave);
        let timeout = self.tcp_config.connect_timeout;
        let mut guard = self.tcp.ctx.lock().unwrap();
        let connected = self.tcp.rt.block_on(async {
            tokio::time::timeout(timeout, tcp::connect_slave(addr, slave)).await
        });
        match connected {
            Ok(Ok(ctx)) => {
                *guard = Some(ctx);
                self.tcp.connected.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Ok(Err(e)) => {
                log::warn!("tcp connect to {addr} failed: {e}");
                Ok(false)
            }
            Err(_) => {
                log::warn!("tcp connect to {addr} timed out after {timeout:?}");
                Ok(false)
            }
        }
    }

    pub fn connect_rtu(&self) -> Result<bool, TransportError> {
        if self.is_connected_rtu() {
            return Ok(true);
        }
        let cfg = &self.rtu_config;
        let parity = match cfg.parity {
            'E' | 'e' => Parity::Even,
            'O' | 'o' => Parity::Odd,
            _ => Parity::None,
        };
        let data_bits = match cfg.bytesize {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match cfg.stopbits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let slave = Slave(cfg.slave);

        let mut guard = self.rtu.ctx.lock().unwrap();
        let opened = self.rtu.rt.block_on(async {
            let builder = tokio_serial::new(&cfg.port, cfg.baud_rate)
                .data_bits(data_bits)
                .parity(parity)
                .stopbits(stop_bits)
                .timeout(cfg.timeout);
            builder.open_native_async()
        });
        match opened {
            Ok(serial) => {
                let ctx = rtu::attach_slave(serial, slave);
                *guard = Some(ctx);
                self.rtu.connected.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                log::warn!("rtu open of {} failed: {e}", cfg.port);
                Ok(false)
            }
        }
    }

    /// Tears down both clients unconditionally. Used at shutdown.
    pub fn disconnect(&self) {
        self.tcp.force_close();
        self.rtu.force_close();
    }

    pub fn force_close_tcp(&self) {
        self.tcp.force_close();
    }

    pub fn force_close_rtu(&self) {
        self.rtu.force_close();
    }

    pub fn tcp_slave(&self) -> u8 {
        self.tcp_config.slave
    }

    pub fn rtu_slave(&self) -> u8 {
        self.rtu_config.slave
    }

    pub fn op_timeout(&self, transport: Transport) -> Duration {
        match transport {
            Transport::Tcp => self.tcp_config.op_timeout,
            Transport::Rtu => self.rtu_config.timeout,
        }
    }

    pub(crate) fn client(&self, transport: Transport) -> &ClientState {
        match transport {
            Transport::Tcp => &self.tcp,
            Transport::Rtu => &self.rtu,
        }
    }
}
