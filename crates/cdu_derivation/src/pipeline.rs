use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdu_config::{ComponentType, ConfigRepository};
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};
use cdu_scheduler::WorkerPool;

use crate::fault::FaultTimers;
use crate::{aggregates, fan, io, mirror, pump, sensors, valve};

const TICK: Duration = Duration::from_millis(50);

/// After this many ticks with still-zero duty reads, mirror anyway rather
/// than waiting forever for hardware that may never report nonzero duty
/// (mirrors the teacher's `data_ready_check_count >= 10` escape hatch,
/// rescaled from the teacher's 150 ms cadence to this pipeline's 50 ms one).
const MIRROR_TICK_CAP: u32 = 30;

/// Runs the derivation sweep over every configured component at a fixed
/// 50 ms cadence: raw PCBA registers in, fault-confirmed physical
/// values and derived aggregates out.
pub struct DerivationPipeline {
    config: Arc<ConfigRepository>,
    raw: Arc<RawRegisterImage>,
    processed: Arc<ProcessedRegisterMap>,
    timers: FaultTimers,
    mirrored: AtomicBool,
    ticks: AtomicU32,
}

impl DerivationPipeline {
    pub fn new(config: Arc<ConfigRepository>, raw: Arc<RawRegisterImage>, processed: Arc<ProcessedRegisterMap>) -> Arc<Self> {
        Arc::new(Self {
            config,
            raw,
            processed,
            timers: FaultTimers::new(),
            mirrored: AtomicBool::new(false),
            ticks: AtomicU32::new(0),
        })
    }

    /// Spawns the single dedicated derivation thread.
    pub fn start(self: &Arc<Self>) -> WorkerPool {
        let pipeline = self.clone();
        WorkerPool::spawn("derivation", 1, move |_, shutdown| {
            let deadline = Instant::now() + TICK;
            pipeline.tick(Instant::now());
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep_chunked(remaining, shutdown);
        })
    }

    pub fn tick(&self, now: Instant) {
        let mut fan_idx = 0u16;
        for fan_cfg in self.config.components_of(ComponentType::Fan) {
            fan::process_fan(fan_cfg, &self.raw, &self.processed, fan_idx, &self.timers, now);
            fan_idx += 1;
        }

        let mut pump_idx = 0u16;
        for pump_cfg in self.config.components_of(ComponentType::Pump) {
            pump::process_pump(pump_cfg, &self.raw, &self.processed, pump_idx, &self.timers, now);
            pump_idx += 1;
        }

        let mut pv_idx = 0u16;
        for pv_cfg in self.config.components_of(ComponentType::ProportionalValve) {
            valve::process_valve(pv_cfg, &self.raw, &self.processed, pv_idx, &self.timers, now);
            pv_idx += 1;
        }

        let (mut temp_idx, mut press_idx, mut flow_idx, mut ph_idx, mut pht_idx) = (0u16, 0u16, 0u16, 0u16, 0u16);
        for sensor_cfg in self.config.components_of(ComponentType::Sensor) {
            if sensor_cfg.contains_field("r_d_temperature_address") {
                sensors::process_temperature(sensor_cfg, &self.raw, &self.processed, temp_idx, &self.timers, now);
                temp_idx += 1;
            } else if sensor_cfg.contains_field("r_d_pressure_address") {
                sensors::process_pressure(sensor_cfg, &self.raw, &self.processed, press_idx, &self.timers, now);
                press_idx += 1;
            } else if sensor_cfg.contains_field("r_d_flow_address") {
                sensors::process_flow(sensor_cfg, &self.raw, &self.processed, flow_idx, &self.timers, now);
                flow_idx += 1;
            } else if sensor_cfg.contains_field("r_d_ph_address") {
                sensors::process_ph(sensor_cfg, &self.raw, &self.processed, ph_idx, &self.timers, now);
                ph_idx += 1;
            } else if sensor_cfg.contains_field("r_d_pht_address") {
                sensors::process_environment(sensor_cfg, &self.raw, &self.processed, pht_idx, &self.timers, now);
                pht_idx += 1;
            }
        }

        let mut input_idx = 0u16;
        for input_cfg in self.config.components_of(ComponentType::Input) {
            io::process_io_input(input_cfg, &self.raw, &self.processed, input_idx);
            input_idx += 1;
        }

        let mut output_idx = 0u16;
        for output_cfg in self.config.components_of(ComponentType::Output) {
            io::process_io_output(output_cfg, &self.raw, &self.processed, output_idx);
            output_idx += 1;
        }

        aggregates::temperature_diff(&self.processed);
        aggregates::pressure_diff(&self.processed);
        aggregates::cooling_capacity(&self.processed, self.f2_decimals());

        self.maybe_mirror();
    }

    /// F2 (the second configured flow sensor, feeding `FLOW_VALUE_START + 1`)
    /// is the flow input to the cooling-capacity formula; its own configured
    /// `r_d_flow_decimals` determines the scale its register is stored at,
    /// default 1 when the field is absent.
    fn f2_decimals(&self) -> u8 {
        self.config
            .components_of(ComponentType::Sensor)
            .filter(|s| s.contains_field("r_d_flow_address"))
            .nth(1)
            .map(|s| s.int_field("r_d_flow_decimals", 1) as u8)
            .unwrap_or(1)
    }

    fn maybe_mirror(&self) {
        if self.mirrored.load(Ordering::SeqCst) {
            return;
        }
        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let has_data = self.processed.get_registers(address::PUMP_DUTY_READ, address::PUMP_BLOCK_LEN).iter().any(|&v| v != 0)
            || self.processed.get_registers(address::FAN_DUTY_READ, address::FAN_BLOCK_LEN).iter().any(|&v| v != 0)
            || self.processed.get_registers(address::PV_DUTY_READ, address::PV_BLOCK_LEN).iter().any(|&v| v != 0);

        if has_data || ticks >= MIRROR_TICK_CAP {
            if self.mirrored.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                log::info!("derivation pipeline: performing one-shot read-to-write register mirror");
                mirror::mirror_read_to_write(&self.processed);
            }
        }
    }
}

fn sleep_chunked(duration: Duration, shutdown: &AtomicBool) {
    let chunk = Duration::from_millis(10);
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
                        "min_duty": 500,
                        "rw_d_duty_register_address": {"local": 10},
                        "r_d_current_address": {"local": 11}
                    }}
                ],
                "sensor": [
                    {"name": "T1", "config": {"r_d_temperature_address": {"local": 1}}}
                ]
            }"#,
        );
        write("communication_task.json", "[]");
        write("low_frequency_task.json", "[]");
        dir
    }

    #[test]
    fn tick_processes_configured_components_without_panicking() {
        let dir = seed_config_dir();
        let config = ConfigRepository::load(dir.path()).unwrap();
        let raw = Arc::new(RawRegisterImage::new());
        let processed = Arc::new(ProcessedRegisterMap::new());
        let pipeline = DerivationPipeline::new(config, raw, processed.clone());
        pipeline.tick(Instant::now());
        // Temperature sensor at index 0 with raw register unset reads 0.
        assert_eq!(processed.get_register(address::TEMP_VALUE), 0);
    }

    #[test]
    fn mirror_runs_once_data_becomes_available() {
        let dir = seed_config_dir();
        let config = ConfigRepository::load(dir.path()).unwrap();
        let raw = Arc::new(RawRegisterImage::new());
        raw.update_registers(10, &[600]);
        raw.update_coils(address::PUMP_SWITCH_READ, &[true]);
        let processed = Arc::new(ProcessedRegisterMap::new());
        let pipeline = DerivationPipeline::new(config, raw, processed.clone());
        pipeline.tick(Instant::now());
        assert!(pipeline.mirrored.load(Ordering::SeqCst));
        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), processed.get_register(address::PUMP_DUTY_READ));
    }
}
