use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cdu_config::{ComponentType, ConfigRepository};
use cdu_registers::{address, ProcessedRegisterMap};

use crate::writer::ComponentWriter;

const FAN_SHUTDOWN_DELAY: Duration = Duration::from_secs(15);

fn in_range(address_: u16, start: u16, len: u16) -> bool {
    address_ >= start && address_ < start + len
}

/// Owns the single coil and register write-range callbacks on
/// [`ProcessedRegisterMap`] and turns address-space writes into
/// [`ComponentWriter`] calls. This is the one place HMI writes, REST
/// writes, and the batch convenience registers all funnel through.
pub struct WriteDispatcher {
    writer: Arc<ComponentWriter>,
    config: Arc<ConfigRepository>,
    processed: Arc<ProcessedRegisterMap>,
    fan_switch_batch: AtomicBool,
    pump_switch_batch: AtomicBool,
    io_output_batch: AtomicBool,
    fan_duty_batch: AtomicBool,
    pump_duty_batch: AtomicBool,
    pv_duty_batch: AtomicBool,
    fan_shutdown: Mutex<Option<Arc<AtomicBool>>>,
}

impl WriteDispatcher {
    pub fn new(
        writer: Arc<ComponentWriter>,
        config: Arc<ConfigRepository>,
        processed: Arc<ProcessedRegisterMap>,
    ) -> Arc<Self> {
        Arc::new(Self {
            writer,
            config,
            processed,
            fan_switch_batch: AtomicBool::new(false),
            pump_switch_batch: AtomicBool::new(false),
            io_output_batch: AtomicBool::new(false),
            fan_duty_batch: AtomicBool::new(false),
            pump_duty_batch: AtomicBool::new(false),
            pv_duty_batch: AtomicBool::new(false),
            fan_shutdown: Mutex::new(None),
        })
    }

    fn slave(&self) -> u8 {
        self.config.settings.modbus_tcp.slave_id
    }

    /// Registers the coil and register callbacks. Call exactly once, at
    /// bootstrap, after the map has been constructed and before any client
    /// traffic starts flowing.
    pub fn install(self: &Arc<Self>) {
        let coil_target = self.clone();
        self.processed
            .on_coil_write(move |addr, value| coil_target.handle_coil_write(addr, value));
        let register_target = self.clone();
        self.processed
            .on_register_write(move |addr, value| register_target.handle_register_write(addr, value));
    }

    fn handle_coil_write(&self, address_: u16, value: bool) {
        if address_ == address::WRITE_ENABLE {
            self.apply_write_enable_effect(value);
            return;
        }
        if !self.processed.get_coil(address::WRITE_ENABLE) {
            log::warn!("coil write to {address_} rejected: write_enable is 0");
            return;
        }

        if in_range(address_, address::FAN_SWITCH_WRITE, address::FAN_SWITCH_WRITE_LEN) {
            self.write_indexed_switch(ComponentType::Fan, address_ - address::FAN_SWITCH_WRITE, value);
        } else if in_range(address_, address::PUMP_SWITCH_WRITE, address::PUMP_SWITCH_WRITE_LEN) {
            self.write_indexed_switch(ComponentType::Pump, address_ - address::PUMP_SWITCH_WRITE, value);
        } else if in_range(address_, address::IO_OUTPUT_WRITE, address::IO_OUTPUT_WRITE_LEN) {
            self.write_indexed_switch(ComponentType::Output, address_ - address::IO_OUTPUT_WRITE, value);
        } else if address_ == address::FAN_BATCH {
            self.batch_write_fan_switch(value);
        } else if address_ == address::PUMP_BATCH {
            self.batch_write_pump_switch(value);
        } else if address_ == address::IO_OUTPUT_BATCH {
            self.batch_write_io_output_switch(value);
        }
    }

    fn handle_register_write(&self, address_: u16, value: u16) {
        if !self.processed.get_coil(address::WRITE_ENABLE) {
            log::warn!("register write to {address_} rejected: write_enable is 0");
            return;
        }
        let control_mode = self.processed.get_register(address::CONTROL_MODE);
        // Auto-control now drives pump duty straight through ComponentWriter
        // (see AutoControlManager), so any write still arriving here in an
        // auto mode is HMI/REST-sourced and loses to the control loop.
        let auto_mode_owns_pumps = matches!(control_mode, 2 | 3 | 4);

        if in_range(address_, address::PUMP_DUTY_WRITE, address::PUMP_BLOCK_LEN) {
            if auto_mode_owns_pumps {
                log::warn!(
                    "pump duty write to {address_} rejected: auto-control owns actuators in mode {control_mode}"
                );
                return;
            }
            self.write_indexed_duty(ComponentType::Pump, address_ - address::PUMP_DUTY_WRITE, value, DutyShape::Pump);
        } else if address_ == address::PUMP_BATCH_DUTY {
            if auto_mode_owns_pumps {
                log::warn!("pump batch duty write rejected: auto-control owns actuators in mode {control_mode}");
                return;
            }
            self.batch_write_pump_duty(value);
        } else if in_range(address_, address::PV_DUTY_WRITE, address::PV_BLOCK_LEN) {
            self.write_indexed_duty(ComponentType::ProportionalValve, address_ - address::PV_DUTY_WRITE, value, DutyShape::Unscaled);
        } else if address_ == address::PV_BATCH_DUTY {
            self.batch_write_pv_duty(value);
        } else if in_range(address_, address::FAN_DUTY_WRITE, address::FAN_BLOCK_LEN) {
            self.write_indexed_duty(ComponentType::Fan, address_ - address::FAN_DUTY_WRITE, value, DutyShape::Unscaled);
        } else if address_ == address::FAN_BATCH_DUTY {
            self.batch_write_fan_duty(value);
        }
        // CONTROL_MODE / TARGET_FLOW / TARGET_TEMP / TARGET_DP have no
        // component behind them; the auto-control loop watches those
        // itself.
    }

    fn name_at(&self, comp_type: ComponentType, index: u16) -> Option<String> {
        self.config.components_of(comp_type).nth(index as usize).map(|c| c.name.clone())
    }

    fn write_indexed_switch(&self, comp_type: ComponentType, index: u16, on: bool) {
        let Some(name) = self.name_at(comp_type, index) else {
            return;
        };
        let result = match comp_type {
            ComponentType::Fan => self.writer.write_fan_switch(&name, on, self.slave()),
            ComponentType::Pump => self.writer.write_pump_switch(&name, on, self.slave()),
            _ => self.writer.write_io_output(&name, on, self.slave()),
        };
        if let Err(err) = result {
            log::debug!("{comp_type:?} switch write for {name} not applied: {err}");
        }
    }

    fn write_indexed_duty(&self, comp_type: ComponentType, index: u16, value: u16, shape: DutyShape) {
        let Some(name) = self.name_at(comp_type, index) else {
            return;
        };
        let duty = value as i64;
        let result = match shape {
            DutyShape::Pump => self.writer.write_pump_duty(&name, duty, self.slave()),
            DutyShape::Unscaled if comp_type == ComponentType::Fan => self.writer.write_fan_duty(&name, duty, self.slave()),
            DutyShape::Unscaled => self.writer.write_pv_duty(&name, duty, self.slave()),
        };
        if let Err(err) = result {
            log::debug!("{comp_type:?} duty write for {name} not applied: {err}");
        }
    }

    /// Writes every configured component of `comp_type` to `on` straight
    /// through [`ComponentWriter`], then mirrors the processed coil image
    /// with `trigger_callback=false` so readers see the new state without
    /// re-entering this same callback.
    fn batch_set_coils(&self, comp_type: ComponentType, base: u16, on: bool, guard: &AtomicBool, write: impl Fn(&ComponentWriter, &str, bool, u8) -> Result<(), crate::error::TaskRejection>) {
        if guard.swap(true, Ordering::SeqCst) {
            return;
        }
        let slave = self.slave();
        for (i, comp) in self.config.components_of(comp_type).enumerate() {
            if let Err(err) = write(&self.writer, &comp.name, on, slave) {
                log::debug!("{comp_type:?} batch switch write for {} not applied: {err}", comp.name);
            }
            self.processed.set_coil(base + i as u16, on, false);
        }
        guard.store(false, Ordering::SeqCst);
    }

    pub fn batch_write_fan_switch(&self, on: bool) {
        self.batch_set_coils(ComponentType::Fan, address::FAN_SWITCH_WRITE, on, &self.fan_switch_batch, ComponentWriter::write_fan_switch);
    }

    pub fn batch_write_pump_switch(&self, on: bool) {
        self.batch_set_coils(ComponentType::Pump, address::PUMP_SWITCH_WRITE, on, &self.pump_switch_batch, ComponentWriter::write_pump_switch);
    }

    pub fn batch_write_io_output_switch(&self, on: bool) {
        self.batch_set_coils(ComponentType::Output, address::IO_OUTPUT_WRITE, on, &self.io_output_batch, ComponentWriter::write_io_output);
    }

    pub fn batch_write_fan_duty(&self, duty: u16) {
        if self.fan_duty_batch.swap(true, Ordering::SeqCst) {
            return;
        }
        let slave = self.slave();
        for (i, comp) in self.config.components_of(ComponentType::Fan).enumerate() {
            if let Err(err) = self.writer.write_fan_duty(&comp.name, duty as i64, slave) {
                log::debug!("fan batch duty write for {} not applied: {err}", comp.name);
            }
            self.processed.set_register(address::FAN_DUTY_WRITE + i as u16, duty, false);
        }
        self.fan_duty_batch.store(false, Ordering::SeqCst);
    }

    pub fn batch_write_pump_duty(&self, duty: u16) {
        if self.pump_duty_batch.swap(true, Ordering::SeqCst) {
            return;
        }
        let slave = self.slave();
        self.writer.batch_write_pump_duty(duty as i64, slave);
        for (i, _) in self.config.components_of(ComponentType::Pump).enumerate() {
            self.processed.set_register(address::PUMP_DUTY_WRITE + i as u16, duty, false);
        }
        self.pump_duty_batch.store(false, Ordering::SeqCst);
    }

    pub fn batch_write_pv_duty(&self, duty: u16) {
        if self.pv_duty_batch.swap(true, Ordering::SeqCst) {
            return;
        }
        let slave = self.slave();
        self.writer.batch_write_pv_duty(duty as i64, slave);
        for (i, _) in self.config.components_of(ComponentType::ProportionalValve).enumerate() {
            self.processed.set_register(address::PV_DUTY_WRITE + i as u16, duty, false);
        }
        self.pv_duty_batch.store(false, Ordering::SeqCst);
    }

    /// `write_enable` is the master actuator gate: turning it on restores
    /// full PV opening and starts all fans; turning it off idles the pumps
    /// immediately (the real write goes straight out, not through this
    /// gated callback) and lets the fans coast down on a delay.
    fn apply_write_enable_effect(&self, enable: bool) {
        if enable {
            self.cancel_fan_shutdown();
            self.batch_write_fan_switch(true);
            self.batch_write_pv_duty(10000);
        } else {
            self.batch_write_pump_duty(0);
            self.schedule_fan_shutdown();
        }
    }

    fn cancel_fan_shutdown(&self) {
        if let Some(prior) = self.fan_shutdown.lock().unwrap().take() {
            prior.store(true, Ordering::SeqCst);
        }
    }

    /// Schedules a single, replaceable one-shot: starting a new timer
    /// cancels whichever one was pending. Runs the fan shutoff on its own
    /// thread so the coil-write callback returns immediately.
    fn schedule_fan_shutdown(&self) {
        self.cancel_fan_shutdown();
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.fan_shutdown.lock().unwrap() = Some(cancelled.clone());

        let config = self.config.clone();
        let processed = self.processed.clone();
        let writer = self.writer.clone();
        let slave = self.slave();
        let _: JoinHandle<()> = std::thread::Builder::new()
            .name("fan-shutdown".into())
            .spawn(move || {
                let chunk = Duration::from_millis(100);
                let mut remaining = FAN_SHUTDOWN_DELAY;
                while remaining > Duration::ZERO {
                    if cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    let step = remaining.min(chunk);
                    std::thread::sleep(step);
                    remaining = remaining.saturating_sub(step);
                }
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                for (i, comp) in config.components_of(ComponentType::Fan).enumerate() {
                    if let Err(err) = writer.write_fan_switch(&comp.name, false, slave) {
                        log::debug!("fan shutdown write for {} not applied: {err}", comp.name);
                    }
                    processed.set_coil(address::FAN_SWITCH_WRITE + i as u16, false, false);
                }
            })
            .expect("spawn fan-shutdown thread");
    }

    pub fn writer(&self) -> &Arc<ComponentWriter> {
        &self.writer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DutyShape {
    /// Pump duty divides the global 0..=10000 scale by 100 to reach the
    /// component's own percent field.
    Pump,
    /// Fan and PV duty share the global scale directly with their field.
    Unscaled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_config::ConfigRepository;
    use cdu_transport::{RtuConfig, TcpConfig, TransportManager};
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
                        "rw_d_duty_register_address": {"local": 632},
                        "rw_d_duty_decimals": 0,
                        "rw_d_duty_min": 0,
                        "rw_d_duty_max": 90
                    }}
                ],
                "fans": [
                    {"name": "Fan1", "config": {
                        "enabled": true,
                        "rw_b_switch_address": {"local": 33}
                    }}
                ]
            }"#,
        );
        write("communication_task.json", "[]");
        write("low_frequency_task.json", "[]");
        dir
    }

    fn dispatcher(dir: &std::path::Path) -> (Arc<WriteDispatcher>, Arc<ProcessedRegisterMap>, Arc<ComponentWriter>) {
        let config = ConfigRepository::load(dir).unwrap();
        let processed = Arc::new(ProcessedRegisterMap::new());
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let tcp_sup = cdu_transport::ReconnectSupervisor::new(Arc::new(cdu_transport::TcpTarget(transport.clone())), Duration::from_secs(1));
        let rtu_sup = cdu_transport::ReconnectSupervisor::new(Arc::new(cdu_transport::RtuTarget(transport.clone())), Duration::from_secs(1));
        let writer = ComponentWriter::new(config.clone(), processed.clone(), transport, tcp_sup, rtu_sup, 1);
        let dispatcher = WriteDispatcher::new(writer.clone(), config, processed.clone());
        dispatcher.install();
        (dispatcher, processed, writer)
    }

    #[test]
    fn write_enable_on_starts_fans_and_opens_pv_fully() {
        let (_d, processed, _w) = dispatcher(&seed_config_dir());
        processed.set_coil(address::WRITE_ENABLE, true, true);
        assert!(processed.get_coil(address::FAN_SWITCH_WRITE));
        assert_eq!(processed.get_register(address::PV_DUTY_WRITE), 10000);
    }

    #[test]
    fn write_enable_off_zeroes_pumps_immediately() {
        let (_d, processed, _w) = dispatcher(&seed_config_dir());
        processed.set_coil(address::WRITE_ENABLE, true, true);
        processed.set_register(address::PUMP_DUTY_WRITE, 5000, true);
        processed.set_coil(address::WRITE_ENABLE, false, true);
        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), 0);
    }

    #[test]
    fn hmi_pump_batch_duty_write_is_rejected_when_auto_control_owns_actuators() {
        let (_d, processed, _w) = dispatcher(&seed_config_dir());
        processed.set_coil(address::WRITE_ENABLE, true, true);
        processed.set_register(address::CONTROL_MODE, 3, true);
        // Rejected before it ever reaches batch_write_pump_duty, so the
        // per-component mirror at PUMP_DUTY_WRITE never happens.
        processed.set_register(address::PUMP_BATCH_DUTY, 3000, true);
        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), 0);
    }
}
