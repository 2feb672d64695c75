use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cdu_config::ConfigRepository;
use cdu_control::{AutoControlManager, ComponentWriter, WriteDispatcher};
use cdu_derivation::DerivationPipeline;
use cdu_hmi::HmiRtuSlave;
use cdu_registers::{ProcessedRegisterMap, RawRegisterImage};
use cdu_scheduler::{default_heartbeat_descriptor, LowFrequencyScheduler, PollingScheduler, WorkerPool};
use cdu_transport::{ReconnectSupervisor, RtuConfig, RtuTarget, TcpConfig, TcpTarget, TransportManager};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const WORKER_COUNT: usize = 4;

/// Every long-lived handle the daemon holds onto, so `main` can wait on a
/// shutdown signal without the threads it started being dropped out from
/// under it.
pub struct Controller {
    pub config: Arc<ConfigRepository>,
    pub processed: Arc<ProcessedRegisterMap>,
    pub transport: Arc<TransportManager>,
    pub tcp_reconnect: Arc<ReconnectSupervisor>,
    pub rtu_reconnect: Arc<ReconnectSupervisor>,
    pub polling: Arc<PollingScheduler>,
    pub low_frequency: Arc<LowFrequencyScheduler>,
    pub derivation: Arc<DerivationPipeline>,
    pub writer: Arc<ComponentWriter>,
    pub dispatcher: Arc<WriteDispatcher>,
    pub hmi: Arc<HmiRtuSlave>,
    pub auto_control: Arc<AutoControlManager>,
    polling_pool: Option<WorkerPool>,
    polling_watchdog: Option<std::thread::JoinHandle<()>>,
    low_frequency_pool: Option<WorkerPool>,
    derivation_pool: Option<WorkerPool>,
    writer_pool: Option<WorkerPool>,
}

fn tcp_config(config: &ConfigRepository) -> TcpConfig {
    TcpConfig {
        host: config.settings.modbus_tcp.ip.clone(),
        port: config.settings.modbus_tcp.port,
        slave: config.settings.modbus_tcp.slave_id,
        ..TcpConfig::default()
    }
}

fn rtu_config(config: &ConfigRepository) -> RtuConfig {
    RtuConfig {
        port: config.settings.modbus_rtu.port.clone(),
        baud_rate: config.settings.modbus_rtu.baud_rate,
        bytesize: config.settings.modbus_rtu.bytesize,
        parity: config.settings.modbus_rtu.parity.chars().next().unwrap_or('N'),
        stopbits: config.settings.modbus_rtu.stopbits,
        slave: config.settings.modbus_rtu.slave_id,
        ..RtuConfig::default()
    }
}

/// Builds and starts every piece of the controller, in the order laid out
/// for `cdu_daemon::bootstrap`: config → register maps → transport →
/// reconnect supervisors → schedulers → derivation → component writer →
/// HMI slave → auto-control, mirroring `AppController.__init__`/
/// `start_service`.
pub fn bootstrap(config_dir: &Path, settings_override: Option<&Path>) -> Result<Controller, cdu_config::ConfigError> {
    let config = ConfigRepository::load_with_settings_override(config_dir, settings_override)?;
    let processed = Arc::new(ProcessedRegisterMap::new());
    let raw = Arc::new(RawRegisterImage::new());
    let transport = Arc::new(TransportManager::new(tcp_config(&config), rtu_config(&config)));

    let tcp_reconnect = ReconnectSupervisor::new(Arc::new(TcpTarget(transport.clone())), RECONNECT_INTERVAL);
    let rtu_reconnect = ReconnectSupervisor::new(Arc::new(RtuTarget(transport.clone())), RECONNECT_INTERVAL);

    let polling = Arc::new(PollingScheduler::new(
        transport.clone(),
        raw.clone(),
        tcp_reconnect.clone(),
        rtu_reconnect.clone(),
        config.tasks.clone(),
        WORKER_COUNT,
    ));
    let low_frequency = LowFrequencyScheduler::new(
        transport.clone(),
        raw.clone(),
        tcp_reconnect.clone(),
        rtu_reconnect.clone(),
        config.low_frequency_tasks.clone(),
        default_heartbeat_descriptor(),
        1,
    );

    tcp_reconnect.on_reconnected({
        let polling = polling.clone();
        move || {
            polling.update_mode();
        }
    });

    let derivation = DerivationPipeline::new(config.clone(), raw.clone(), processed.clone());

    let writer = ComponentWriter::new(
        config.clone(),
        processed.clone(),
        transport.clone(),
        tcp_reconnect.clone(),
        rtu_reconnect.clone(),
        WORKER_COUNT,
    );
    let dispatcher = WriteDispatcher::new(writer.clone(), config.clone(), processed.clone());
    dispatcher.install();

    let hmi = HmiRtuSlave::new(processed.clone(), config.settings.modbus_hmi.rtu.clone());

    let auto_control = AutoControlManager::new(config.clone(), processed.clone(), dispatcher.clone());
    auto_control.install();

    log::info!("connecting to initial transports");
    if let Err(e) = transport.connect_tcp() {
        log::warn!("initial TCP connect failed, relying on auto-reconnect: {e}");
    }
    if let Err(e) = transport.connect_rtu() {
        log::warn!("initial RTU connect failed, relying on auto-reconnect: {e}");
    }

    let (polling_pool, polling_watchdog) = polling.start();
    let low_frequency_pool = low_frequency.start();
    let derivation_pool = derivation.start();
    let writer_pool = writer.start();
    tcp_reconnect.activate();
    rtu_reconnect.activate();
    hmi.start();
    auto_control.bootstrap_from_current_state();

    log::info!("controller fully started");

    Ok(Controller {
        config,
        processed,
        transport,
        tcp_reconnect,
        rtu_reconnect,
        polling,
        low_frequency,
        derivation,
        writer,
        dispatcher,
        hmi,
        auto_control,
        polling_pool: Some(polling_pool),
        polling_watchdog: Some(polling_watchdog),
        low_frequency_pool: Some(low_frequency_pool),
        derivation_pool: Some(derivation_pool),
        writer_pool: Some(writer_pool),
    })
}

impl Controller {
    /// Bounded shutdown of every worker pool; called once on the way out
    /// of `main`.
    pub fn shutdown(&mut self) {
        self.tcp_reconnect.shutdown();
        self.rtu_reconnect.shutdown();
        self.auto_control.stop();
        let timeout = Duration::from_secs(2);
        if let Some(pool) = self.writer_pool.take() {
            pool.shutdown(timeout);
        }
        if let Some(pool) = self.derivation_pool.take() {
            pool.shutdown(timeout);
        }
        if let Some(pool) = self.low_frequency_pool.take() {
            pool.shutdown(timeout);
        }
        if let Some(pool) = self.polling_pool.take() {
            pool.shutdown(timeout);
        }
        self.polling_watchdog.take();
    }
}
