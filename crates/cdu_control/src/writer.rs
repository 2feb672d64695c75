use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdu_config::{ComponentType, ConfigRepository, WriteKind};
use cdu_registers::ProcessedRegisterMap;
use cdu_scheduler::{Mode, WorkerPool};
use cdu_transport::{BatchIo, ReconnectSupervisor, Transport, TransportManager, MAX_RETRY_WRITE};

use crate::error::TaskRejection;

fn to_u16(value: i64) -> u16 {
    let folded = if value < 0 { value + 0x1_0000 } else { value };
    (folded & 0xFFFF) as u16
}

/// One pending Modbus write, already resolved to a concrete address/value.
#[derive(Debug, Clone)]
struct WriteJob {
    component: String,
    kind: WriteKind,
    address: u16,
    value: u16,
    slave: u8,
}

/// `(write_kind, address, slave, mode)` — the teacher's literal de-dup key
/// is `(write_type, address)`; this port folds in `slave` and `mode` per
/// the testable property that a mode switch guarantees at least one
/// refresh even when the value itself hasn't changed.
type DedupKey = (WriteKind, u16, u8, Mode);

/// Resolves high-level component writes into retried Modbus I/O, serialized
/// per underlying transport client. [`WriteDispatcher`](crate::dispatch::WriteDispatcher)
/// is the address-range callback that HMI/REST writes flow through before
/// landing here; [`crate::auto::AutoControlManager`] calls the `batch_write_*`
/// entry points directly.
pub struct ComponentWriter {
    config: Arc<ConfigRepository>,
    processed: Arc<ProcessedRegisterMap>,
    transport: Arc<TransportManager>,
    tcp_reconnect: Arc<ReconnectSupervisor>,
    rtu_reconnect: Arc<ReconnectSupervisor>,
    queue: Arc<cdu_scheduler::PriorityTaskQueue<WriteJob>>,
    mode: Mutex<Mode>,
    last_write_values: Mutex<HashMap<DedupKey, u16>>,
    worker_count: usize,
    pump_duty_batch: AtomicBool,
    pv_duty_batch: AtomicBool,
    io_output_batch: AtomicBool,
}

impl ComponentWriter {
    pub fn new(
        config: Arc<ConfigRepository>,
        processed: Arc<ProcessedRegisterMap>,
        transport: Arc<TransportManager>,
        tcp_reconnect: Arc<ReconnectSupervisor>,
        rtu_reconnect: Arc<ReconnectSupervisor>,
        worker_count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            processed,
            transport,
            tcp_reconnect,
            rtu_reconnect,
            queue: Arc::new(cdu_scheduler::PriorityTaskQueue::new()),
            mode: Mutex::new(Mode::None),
            last_write_values: Mutex::new(HashMap::new()),
            worker_count,
            pump_duty_batch: AtomicBool::new(false),
            pv_duty_batch: AtomicBool::new(false),
            io_output_batch: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Arc<ConfigRepository> {
        &self.config
    }

    pub fn processed(&self) -> &Arc<ProcessedRegisterMap> {
        &self.processed
    }

    /// Sole writer of the writer's own mode (distinct from any scheduler's;
    /// the teacher keeps one `current_mode` per manager instance).
    pub fn update_mode(&self) -> Mode {
        let new_mode = if self.transport.is_connected_tcp() {
            Mode::Tcp
        } else if self.transport.is_connected_rtu() {
            Mode::Rtu
        } else {
            Mode::None
        };
        let mut guard = self.mode.lock().unwrap();
        if *guard != new_mode {
            log::info!("component writer mode: {:?} -> {new_mode:?}", *guard);
            if new_mode == Mode::None {
                self.queue.pause();
            } else if *guard == Mode::None {
                self.queue.resume();
            }
        }
        *guard = new_mode;
        new_mode
    }

    pub fn current_mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    /// `fields` is the candidate write-value map; the first configured
    /// writable field matching any key wins.
    pub fn operate_component(
        &self,
        name: &str,
        fields: &[(&str, i64)],
        slave: u8,
        priority: i32,
    ) -> Result<(), TaskRejection> {
        let mode = self.update_mode();
        if mode == Mode::None {
            log::warn!("communication offline, reject new write task for {name}");
            return Err(TaskRejection::CommunicationOffline);
        }

        let param = self
            .config
            .component(name)
            .ok_or_else(|| TaskRejection::ComponentNotFound(name.to_string()))?;
        if !param.enabled {
            return Err(TaskRejection::ComponentDisabled(name.to_string()));
        }

        let (field_name, field, value) = param
            .pick_first_writable(fields)
            .ok_or(TaskRejection::NoWritableField)?;

        let mut ivalue = value;
        if field.kind == WriteKind::Register && field_name.contains("rw_d_duty") {
            let scale = 10i64.pow(field.decimals as u32);
            if let Some(min) = field.range.0 {
                ivalue = ivalue.max(min * scale);
            }
            if let Some(max) = field.range.1 {
                ivalue = ivalue.min(max * scale);
            }
        }

        let write_value = match field.kind {
            WriteKind::Coil => {
                if ivalue != 0 {
                    1
                } else {
                    0
                }
            }
            WriteKind::Register => to_u16(ivalue),
        };

        let key: DedupKey = (field.kind, field.address, slave, mode);
        {
            let mut last = self.last_write_values.lock().unwrap();
            if last.get(&key) == Some(&write_value) {
                log::info!(
                    "skip write: {name}, type={:?}, addr={}, value={write_value} (unchanged)",
                    field.kind, field.address
                );
                return Err(TaskRejection::SkipUnchanged);
            }
            last.insert(key, write_value);
        }

        self.queue.put_task(
            WriteJob {
                component: name.to_string(),
                kind: field.kind,
                address: field.address,
                value: write_value,
                slave,
            },
            priority,
        );
        Ok(())
    }

    /// First configured writable field of the given kind, in the
    /// component's own field order — the teacher's `write_pump_duty` et al.
    /// don't match by name at all, just by write kind (coil vs register).
    fn first_writable_of_kind(&self, name: &str, kind: WriteKind) -> Result<String, TaskRejection> {
        let param = self
            .config
            .component(name)
            .ok_or_else(|| TaskRejection::ComponentNotFound(name.to_string()))?;
        param
            .writable_fields
            .iter()
            .find(|(_, f)| f.kind == kind)
            .map(|(field_name, _)| field_name.clone())
            .ok_or(TaskRejection::NoWritableField)
    }

    /// Translates a global `PUMP_DUTY_WRITE`-scale value (0..=10000) into
    /// the component's own percent field and writes it. `force` bypasses
    /// the write-enable gate upstream in the dispatcher, not here.
    pub fn write_pump_duty(&self, name: &str, duty_global: i64, slave: u8) -> Result<(), TaskRejection> {
        let field = self.first_writable_of_kind(name, WriteKind::Register)?;
        self.operate_component(name, &[(field.as_str(), duty_global / 100)], slave, 0)
    }

    /// PV duty passes through unscaled — the global PV_DUTY_WRITE register
    /// and the component's own field share the same 0..=10000 scale.
    pub fn write_pv_duty(&self, name: &str, duty_global: i64, slave: u8) -> Result<(), TaskRejection> {
        let field = self.first_writable_of_kind(name, WriteKind::Register)?;
        self.operate_component(name, &[(field.as_str(), duty_global)], slave, 0)
    }

    /// Fan duty, unscaled like PV duty. There's no device-manipulation
    /// precedent for fan PWM writes; this mirrors the PV path since both
    /// are plain percentage actuators with no pump-style global/local
    /// scale split.
    pub fn write_fan_duty(&self, name: &str, duty_global: i64, slave: u8) -> Result<(), TaskRejection> {
        let field = self.first_writable_of_kind(name, WriteKind::Register)?;
        self.operate_component(name, &[(field.as_str(), duty_global)], slave, 0)
    }

    /// Writes a component's first coil-kind field. Fan switches, pump
    /// switches, and discrete outputs all resolve through this same path;
    /// only the component they're pointed at differs.
    fn write_coil_field(&self, name: &str, on: bool, slave: u8) -> Result<(), TaskRejection> {
        let field = self.first_writable_of_kind(name, WriteKind::Coil)?;
        self.operate_component(name, &[(field.as_str(), on as i64)], slave, 0)
    }

    pub fn write_fan_switch(&self, name: &str, on: bool, slave: u8) -> Result<(), TaskRejection> {
        self.write_coil_field(name, on, slave)
    }

    pub fn write_pump_switch(&self, name: &str, on: bool, slave: u8) -> Result<(), TaskRejection> {
        self.write_coil_field(name, on, slave)
    }

    pub fn write_io_output(&self, name: &str, on: bool, slave: u8) -> Result<(), TaskRejection> {
        self.write_coil_field(name, on, slave)
    }

    fn names_of(&self, comp_type: ComponentType) -> Vec<String> {
        self.config.components_of(comp_type).map(|c| c.name.clone()).collect()
    }

    /// Writes `duty_global` to every configured pump, direct to the
    /// transport, bypassing any register-map callback. Own reentrancy guard
    /// mirrors the teacher's per-batch-kind flag; a batch already in flight
    /// is skipped rather than queued twice.
    pub fn batch_write_pump_duty(&self, duty_global: i64, slave: u8) {
        if self.pump_duty_batch.swap(true, Ordering::SeqCst) {
            log::warn!("pump duty batch write already in flight, skipping");
            return;
        }
        for name in self.names_of(ComponentType::Pump) {
            if let Err(err) = self.write_pump_duty(&name, duty_global, slave) {
                log::debug!("pump duty batch write for {name} not applied: {err}");
            }
        }
        self.pump_duty_batch.store(false, Ordering::SeqCst);
    }

    /// Writes `duty_global` to every configured proportional valve.
    pub fn batch_write_pv_duty(&self, duty_global: i64, slave: u8) {
        if self.pv_duty_batch.swap(true, Ordering::SeqCst) {
            log::warn!("pv duty batch write already in flight, skipping");
            return;
        }
        for name in self.names_of(ComponentType::ProportionalValve) {
            if let Err(err) = self.write_pv_duty(&name, duty_global, slave) {
                log::debug!("pv duty batch write for {name} not applied: {err}");
            }
        }
        self.pv_duty_batch.store(false, Ordering::SeqCst);
    }

    /// Writes each `(index, on)` pair to the IO output component configured
    /// at that index; indices with no configured output are skipped.
    pub fn batch_write_io_outputs(&self, values: &[(u16, bool)], slave: u8) {
        if self.io_output_batch.swap(true, Ordering::SeqCst) {
            log::warn!("io output batch write already in flight, skipping");
            return;
        }
        let names = self.names_of(ComponentType::Output);
        for &(index, on) in values {
            let Some(name) = names.get(index as usize) else { continue };
            if let Err(err) = self.write_io_output(name, on, slave) {
                log::debug!("io output batch write for {name} not applied: {err}");
            }
        }
        self.io_output_batch.store(false, Ordering::SeqCst);
    }

    /// Spawns the write-queue workers (the pool is sized >= 2 in practice).
    pub fn start(self: &Arc<Self>) -> WorkerPool {
        let writer = self.clone();
        WorkerPool::spawn("component-writer", self.worker_count, move |_, shutdown| {
            writer.worker_tick(shutdown);
        })
    }

    fn worker_tick(&self, shutdown: &AtomicBool) {
        let Some(job) = self.queue.get_task(Duration::from_millis(200)) else {
            return;
        };
        self.queue.wait_if_paused();
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let mut retry = 0u8;
        while retry < 3 {
            let mode = self.update_mode();
            self.queue.wait_if_paused();
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let transport = match mode {
                Mode::Tcp => Transport::Tcp,
                Mode::Rtu => Transport::Rtu,
                Mode::None => {
                    retry += 1;
                    sleep_chunked(Duration::from_secs(1), shutdown);
                    continue;
                }
            };

            let result = match job.kind {
                WriteKind::Coil => {
                    BatchIo::write_coils(&self.transport, transport, job.address, &[job.value != 0], MAX_RETRY_WRITE)
                }
                WriteKind::Register => {
                    BatchIo::write_registers(&self.transport, transport, job.address, &[job.value], MAX_RETRY_WRITE)
                }
            };

            match result {
                Ok(()) => return,
                Err(e) => {
                    log::warn!(
                        "write {:?} failed: {}, addr {}, error: {e}",
                        job.kind, job.component, job.address
                    );
                    match transport {
                        Transport::Tcp => {
                            self.transport.force_close_tcp();
                            self.tcp_reconnect.trigger_reconnect();
                        }
                        Transport::Rtu => {
                            self.transport.force_close_rtu();
                            self.rtu_reconnect.trigger_reconnect();
                        }
                    }
                    self.update_mode();
                    retry += 1;
                    sleep_chunked(Duration::from_secs(1), shutdown);
                }
            }
        }
        log::error!(
            "write {:?} failed after 3 retries: {}, addr {}",
            job.kind, job.component, job.address
        );
    }
}

fn sleep_chunked(duration: Duration, shutdown: &AtomicBool) {
    let chunk = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_transport::{RtuConfig, TcpConfig};
    use std::io::Write;

    fn seed_config_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
        };
        write(
            "settings.json",
            r#"{
                "modbus_tcp": {"ip": "127.0.0.1", "port": 5000, "slave_id": 1},
                "modbus_rtu": {"port": "/dev/ttyUSB0", "baud_rate": 9600, "bytesize": 8, "parity": "N", "stopbits": 1, "slave_id": 1},
                "modbus_hmi": {"rtu": {"port": "/dev/ttyUSB1", "baud_rate": 9600, "bytesize": 8, "parity": "N", "stopbits": 1, "slave_id": 1}},
                "pid_pump": {"Kp": 1.0, "Ki": 0.0, "Kd": 0.0, "Dt": 1.0, "outputmin": 0.0, "outputmax": 100.0},
                "pid_pv": {"Kp": 0.5, "Ki": 0.1, "Kd": 0.0, "Dt": 1.0, "outputmin": 0.0, "outputmax": 100.0}
            }"#,
        );
        write(
            "cdu_120kw_component.json",
            r#"{
                "pumps": [
                    {"name": "Pump1", "config": {
                        "enabled": true,
                        "rw_d_duty_register_address": {"local": 10},
                        "rw_d_duty_decimals": 0,
                        "rw_d_duty_min": 0,
                        "rw_d_duty_max": 90
                    }},
                    {"name": "Pump2Disabled", "config": {
                        "enabled": false,
                        "rw_d_duty_register_address": {"local": 11}
                    }}
                ]
            }"#,
        );
        write("communication_task.json", "[]");
        write("low_frequency_task.json", "[]");
        dir
    }

    fn writer(dir: &std::path::Path) -> Arc<ComponentWriter> {
        let config = ConfigRepository::load(dir).unwrap();
        let processed = Arc::new(ProcessedRegisterMap::new());
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let tcp_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::TcpTarget(transport.clone())), Duration::from_secs(1));
        let rtu_sup = ReconnectSupervisor::new(Arc::new(cdu_transport::RtuTarget(transport.clone())), Duration::from_secs(1));
        ComponentWriter::new(config, processed, transport, tcp_sup, rtu_sup, 1)
    }

    #[test]
    fn offline_mode_rejects_without_enqueueing() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        let err = w
            .operate_component("Pump1", &[("rw_d_duty_register_address", 42)], 1, 0)
            .unwrap_err();
        assert_eq!(err, TaskRejection::CommunicationOffline);
    }

    #[test]
    fn unknown_component_is_rejected() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        let err = w
            .operate_component("Ghost", &[("rw_d_duty_register_address", 1)], 1, 0)
            .unwrap_err();
        assert_eq!(err, TaskRejection::ComponentNotFound("Ghost".to_string()));
    }

    #[test]
    fn disabled_component_is_rejected() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        let err = w
            .operate_component("Pump2Disabled", &[("rw_d_duty_register_address", 1)], 1, 0)
            .unwrap_err();
        assert_eq!(err, TaskRejection::ComponentDisabled("Pump2Disabled".to_string()));
    }

    #[test]
    fn duty_value_clamps_to_configured_range() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        w.operate_component("Pump1", &[("rw_d_duty_register_address", 9999)], 1, 0).unwrap();
        let key: DedupKey = (WriteKind::Register, 10, 1, Mode::Tcp);
        assert_eq!(*w.last_write_values.lock().unwrap().get(&key).unwrap(), 90);
    }

    #[test]
    fn repeated_identical_write_is_skipped() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        w.operate_component("Pump1", &[("rw_d_duty_register_address", 50)], 1, 0).unwrap();
        let err = w
            .operate_component("Pump1", &[("rw_d_duty_register_address", 50)], 1, 0)
            .unwrap_err();
        assert_eq!(err, TaskRejection::SkipUnchanged);
    }

    #[test]
    fn mode_change_forces_a_fresh_write() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        w.operate_component("Pump1", &[("rw_d_duty_register_address", 50)], 1, 0).unwrap();
        *w.mode.lock().unwrap() = Mode::Rtu;
        // Mode switch changes the dedup key even though the value is the same.
        w.operate_component("Pump1", &[("rw_d_duty_register_address", 50)], 1, 0).unwrap();
    }

    #[test]
    fn write_pump_duty_divides_global_scale_by_one_hundred() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        w.write_pump_duty("Pump1", 3000, 1).unwrap(); // global 3000 -> percent 30
        let key: DedupKey = (WriteKind::Register, 10, 1, Mode::Tcp);
        assert_eq!(*w.last_write_values.lock().unwrap().get(&key).unwrap(), 30);
    }

    #[test]
    fn batch_write_pump_duty_reaches_every_enabled_pump_directly() {
        let dir = seed_config_dir();
        let w = writer(dir.path());
        *w.mode.lock().unwrap() = Mode::Tcp;
        // No gate here: batch_write_pump_duty talks straight to the
        // transport, unlike the register-map callback path.
        w.batch_write_pump_duty(3000, 1);
        let key: DedupKey = (WriteKind::Register, 10, 1, Mode::Tcp);
        assert_eq!(*w.last_write_values.lock().unwrap().get(&key).unwrap(), 30);
    }
}
