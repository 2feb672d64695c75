use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdu_config::ModbusRtuSettings;
use cdu_registers::ProcessedRegisterMap;
use tokio_modbus::server::rtu::Server;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use crate::service::RegisterMapService;

const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Owns the single Modbus RTU slave thread that serves the HMI. Grounded in
/// the teacher's single-instance-guard-plus-retry-loop shape from
/// `ComponentWriter`/`ReconnectSupervisor`, applied here to a server rather
/// than a client.
pub struct HmiRtuSlave {
    processed: Arc<ProcessedRegisterMap>,
    settings: ModbusRtuSettings,
    started: AtomicBool,
}

impl HmiRtuSlave {
    pub fn new(processed: Arc<ProcessedRegisterMap>, settings: ModbusRtuSettings) -> Arc<Self> {
        Arc::new(Self {
            processed,
            settings,
            started: AtomicBool::new(false),
        })
    }

    /// Starts the server thread once. A second call is a warned no-op,
    /// matching the teacher's single-instance guard on the write-queue pool.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("HMI RTU slave already running, skipping duplicate start");
            return;
        }
        let this = self.clone();
        std::thread::Builder::new()
            .name("HMI-RTU-Server".into())
            .spawn(move || this.run_forever())
            .expect("spawn HMI-RTU-Server thread");
        log::info!("HMI RTU slave thread started");
    }

    fn run_forever(&self) {
        let rt = tokio::runtime::Runtime::new().expect("failed to start HMI RTU slave runtime");
        loop {
            log::info!("preparing to start modbus RTU slave on {}", self.settings.port);
            if let Err(e) = rt.block_on(self.serve_once()) {
                log::warn!("RTU slave startup failed: {e}, will retry in {RESTART_BACKOFF:?}");
            }
            std::thread::sleep(RESTART_BACKOFF);
        }
    }

    async fn serve_once(&self) -> std::io::Result<()> {
        let parity = match self.settings.parity.as_str() {
            "E" | "e" => Parity::Even,
            "O" | "o" => Parity::Odd,
            _ => Parity::None,
        };
        let data_bits = match self.settings.bytesize {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match self.settings.stopbits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let serial = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stopbits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;

        let service = RegisterMapService::new(self.processed.clone());
        let server = Server::new(serial);
        server.serve_forever(service).await
    }
}
