use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cdu_config::{ComponentType, ConfigRepository};
use cdu_registers::{address, ProcessedRegisterMap};

use crate::dispatch::WriteDispatcher;
use crate::error::ControlFault;
use crate::pid::Pid;

fn from_u16_signed(raw: u16) -> i32 {
    if raw >= 0x8000 {
        raw as i32 - 0x1_0000
    } else {
        raw as i32
    }
}

const STARTUP_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_SUSTAIN: Duration = Duration::from_secs(4);
const MIN_STARTUP_DUTY: u16 = 1000;
const DUTY_READY_THRESHOLD: u16 = 500;
const SPEED_READY_THRESHOLD: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpStartup {
    Checking,
    Starting,
    Ready,
    Failed,
}

/// Drives pump duty and PV duty from target setpoints once a control mode
/// other than manual is active. Owns the pump-startup sequencer and the
/// three PID loops; mode/write-enable transitions reach it through its own
/// callback pair on [`ProcessedRegisterMap`], distinct from
/// [`WriteDispatcher`]'s callback that handles the HMI-facing actuator
/// side effects.
pub struct AutoControlManager {
    config: Arc<ConfigRepository>,
    processed: Arc<ProcessedRegisterMap>,
    dispatcher: Arc<WriteDispatcher>,
    flow_pid: Mutex<Pid>,
    temp_pid: Mutex<Pid>,
    pressure_pid: Mutex<Pid>,
    /// Percent units (the pump PID's own output range), not the global
    /// 0..=10000 register scale — multiplied by 100 only at the final
    /// batch-write call.
    last_pump_duty: Mutex<f64>,
    /// Global 0..=10000 register scale directly, unlike the pump side.
    last_pv_duty: Mutex<f64>,
    running: AtomicBool,
    stop_requested: Arc<AtomicBool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    fault: Mutex<Option<ControlFault>>,
}

impl AutoControlManager {
    pub fn new(
        config: Arc<ConfigRepository>,
        processed: Arc<ProcessedRegisterMap>,
        dispatcher: Arc<WriteDispatcher>,
    ) -> Arc<Self> {
        let flow_pid = Mutex::new(Pid::new(config.settings.pid_pump));
        let pressure_pid = Mutex::new(Pid::new(config.settings.pid_pump));
        let temp_pid = Mutex::new(Pid::new(config.settings.pid_pv));
        Arc::new(Self {
            config,
            processed,
            dispatcher,
            flow_pid,
            temp_pid,
            pressure_pid,
            last_pump_duty: Mutex::new(0.0),
            last_pv_duty: Mutex::new(10000.0),
            running: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
            loop_handle: Mutex::new(None),
            fault: Mutex::new(None),
        })
    }

    /// Registers the control-mode and write-enable callbacks that drive the
    /// loop's own lifecycle. Call once at bootstrap.
    pub fn install(self: &Arc<Self>) {
        let mode_target = self.clone();
        self.processed.on_register_write(move |addr, value| {
            if addr == address::CONTROL_MODE {
                mode_target.on_control_mode_write(value);
            }
        });
        let enable_target = self.clone();
        self.processed.on_coil_write(move |addr, value| {
            if addr == address::WRITE_ENABLE {
                enable_target.on_write_enable_write(value);
            }
        });
    }

    /// Mirrors the one-shot bootstrap check: if mode and write_enable
    /// already agree on an auto mode by the time this runs, start without
    /// waiting for a fresh register write to trigger it.
    pub fn bootstrap_from_current_state(self: &Arc<Self>) {
        let mode = self.processed.get_register(address::CONTROL_MODE);
        if self.write_enable() && matches!(mode, 2 | 3 | 4) {
            self.start();
        }
    }

    fn write_enable(&self) -> bool {
        self.processed.get_coil(address::WRITE_ENABLE)
    }

    fn on_control_mode_write(self: &Arc<Self>, mode: u16) {
        if mode == 1 {
            self.request_stop();
            return;
        }
        if matches!(mode, 2 | 3 | 4) {
            self.dispatcher.batch_write_pv_duty(10000);
            *self.last_pv_duty.lock().unwrap() = 10000.0;
            if self.write_enable() {
                self.start();
            }
        }
    }

    fn on_write_enable_write(self: &Arc<Self>, enabled: bool) {
        if !enabled {
            self.request_stop();
        } else if matches!(self.processed.get_register(address::CONTROL_MODE), 2 | 3 | 4) {
            self.start();
        }
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn fault(&self) -> Option<ControlFault> {
        self.fault.lock().unwrap().clone()
    }

    /// Starts the control thread if it isn't already running. Resets both
    /// PIDs and the pump-startup sequencer on every start.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.flow_pid.lock().unwrap().reset();
        self.temp_pid.lock().unwrap().reset();
        self.pressure_pid.lock().unwrap().reset();
        *self.last_pump_duty.lock().unwrap() = 0.0;
        *self.last_pv_duty.lock().unwrap() = 10000.0;
        *self.fault.lock().unwrap() = None;

        let manager = self.clone();
        let handle = std::thread::Builder::new()
            .name("auto-control".into())
            .spawn(move || manager.run())
            .expect("spawn auto-control thread");
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    /// Requests the loop stop and joins it. Safe to call when not running.
    pub fn stop(&self) {
        self.request_stop();
        if let Some(handle) = self.loop_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn should_continue(&self) -> bool {
        !self.stop_requested.load(Ordering::SeqCst)
    }

    /// Sleeps in 100 ms chunks, bailing out as soon as a stop is requested.
    /// Returns whether the loop should keep going afterward.
    fn sleep_chunked(&self, duration: Duration) -> bool {
        let chunk = Duration::from_millis(100);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if !self.should_continue() {
                return false;
            }
            let step = remaining.min(chunk);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.should_continue()
    }

    fn run(self: Arc<Self>) {
        let mut startup = PumpStartup::Checking;
        let deadline = Instant::now() + STARTUP_TOTAL_TIMEOUT;
        let mut sustained_since: Option<Instant> = None;

        while self.should_continue() {
            match startup {
                PumpStartup::Checking => {
                    startup = self.startup_check();
                }
                PumpStartup::Starting => {
                    if self.all_pumps_ready() {
                        let since = *sustained_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= STARTUP_SUSTAIN {
                            startup = PumpStartup::Ready;
                        }
                    } else {
                        sustained_since = None;
                    }
                    if startup != PumpStartup::Ready && Instant::now() >= deadline {
                        *self.fault.lock().unwrap() = Some(ControlFault::PumpStartupTimeout);
                        log::error!("auto-control: pump startup did not reach ready within 30s, stopping");
                        startup = PumpStartup::Failed;
                    }
                }
                PumpStartup::Ready => {
                    self.control_step();
                }
                PumpStartup::Failed => break,
            }

            if !self.should_continue() {
                break;
            }
            let dt = self.flow_pid.lock().unwrap().dt().max(0.05);
            if !self.sleep_chunked(Duration::from_secs_f64(dt)) {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    fn pump_count(&self) -> u16 {
        self.config.components_of(ComponentType::Pump).count() as u16
    }

    fn all_pumps_ready(&self) -> bool {
        let count = self.pump_count();
        if count == 0 {
            return true;
        }
        (0..count).all(|i| self.processed.get_register(address::PUMP_SPEED + i) > SPEED_READY_THRESHOLD)
    }

    /// Entry state: decide whether pumps are already spinning, need a
    /// nudge to the minimum startup duty, or are mid-spin-up.
    fn startup_check(&self) -> PumpStartup {
        let duty_read0 = self.processed.get_register(address::PUMP_DUTY_READ);
        if duty_read0 > DUTY_READY_THRESHOLD {
            if self.all_pumps_ready() {
                return PumpStartup::Ready;
            }
            return PumpStartup::Starting;
        }
        self.dispatcher.batch_write_pump_duty(MIN_STARTUP_DUTY);
        *self.last_pump_duty.lock().unwrap() = MIN_STARTUP_DUTY as f64 / 100.0;
        PumpStartup::Starting
    }

    fn control_step(&self) {
        if !self.should_continue() {
            return;
        }
        match self.processed.get_register(address::CONTROL_MODE) {
            3 => self.run_flow_only(),
            2 => {
                self.run_flow_only();
                if self.should_continue() {
                    self.run_temp_pv();
                }
            }
            4 => {
                self.run_pressure();
                if self.should_continue() {
                    self.run_temp_pv();
                }
            }
            other => {
                log::warn!("auto-control: unexpected control mode {other} in loop, stopping");
                self.request_stop();
            }
        }
    }

    /// Mode 3 (and the pump half of mode 2): flow PID drives pump duty.
    fn run_flow_only(&self) {
        let target = self.processed.get_register(address::TARGET_FLOW) as f64 / 10.0;
        let measured = from_u16_signed(self.processed.get_register(address::FLOW_VALUE + 1)) as f64 / 10.0;
        let bias = *self.last_pump_duty.lock().unwrap();
        let out = self.flow_pid.lock().unwrap().calculate(target, measured, bias, true);
        self.apply_pump_duty(out);
    }

    /// Mode 4's pump half: pressure PID drives pump duty off ΔP.
    fn run_pressure(&self) {
        let target = self.processed.get_register(address::TARGET_DP) as f64 / 10.0;
        let measured = from_u16_signed(self.processed.get_register(address::PRESS_DIFF)) as f64 / 1000.0;
        let bias = *self.last_pump_duty.lock().unwrap();
        let out = self.pressure_pid.lock().unwrap().calculate(target, measured, bias, true);
        self.apply_pump_duty(out);
    }

    fn apply_pump_duty(&self, out: f64) {
        if !self.should_continue() {
            return;
        }
        *self.last_pump_duty.lock().unwrap() = out;
        let global = (out * 100.0).round().clamp(0.0, 10000.0) as u16;
        self.dispatcher.batch_write_pump_duty(global);
    }

    /// Shared by modes 2 and 4: temperature PID drives PV duty off T4,
    /// reverse-acting (opening the valve further as temperature rises).
    fn run_temp_pv(&self) {
        let target = self.processed.get_register(address::TARGET_TEMP) as f64 / 10.0;
        let measured = self.processed.get_register(address::TEMP_VALUE + 3) as f64 / 10.0;
        let bias = *self.last_pv_duty.lock().unwrap();
        let out = self.temp_pid.lock().unwrap().calculate(target, measured, bias, false);
        if !self.should_continue() {
            return;
        }
        *self.last_pv_duty.lock().unwrap() = out;
        let value = out.clamp(0.0, 10000.0).round() as u16;
        self.dispatcher.batch_write_pv_duty(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdu_config::ConfigRepository;
    use cdu_transport::{RtuConfig, TcpConfig, TransportManager};
    use std::io::Write;

    fn seed_config_dir(pid_pump_out_max: f64) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
        };
        write(
            "settings.json",
            &format!(
                r#"{{
                "modbus_tcp": {{"ip": "127.0.0.1", "port": 5000, "slave_id": 1}},
                "modbus_rtu": {{"port": "/dev/ttyUSB0", "baud_rate": 9600, "bytesize": 8, "parity": "N", "stopbits": 1, "slave_id": 1}},
                "modbus_hmi": {{"rtu": {{"port": "/dev/ttyUSB1", "baud_rate": 9600, "bytesize": 8, "parity": "N", "stopbits": 1, "slave_id": 1}}}},
                "pid_pump": {{"Kp": 1.0, "Ki": 0.0, "Kd": 0.0, "Dt": 1.0, "outputmin": 0.0, "outputmax": {pid_pump_out_max}}},
                "pid_pv": {{"Kp": 0.0, "Ki": 0.0, "Kd": 0.0, "Dt": 1.0, "outputmin": 0.0, "outputmax": 10000.0}}
            }}"#
            ),
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
                        "rw_d_duty_max": 9000
                    }}
                ]
            }"#,
        );
        write("communication_task.json", "[]");
        write("low_frequency_task.json", "[]");
        dir
    }

    fn manager(dir: &std::path::Path, pid_pump_out_max: f64) -> (Arc<AutoControlManager>, Arc<ProcessedRegisterMap>) {
        let _ = pid_pump_out_max;
        let config = ConfigRepository::load(dir).unwrap();
        let processed = Arc::new(ProcessedRegisterMap::new());
        let transport = Arc::new(TransportManager::new(TcpConfig::default(), RtuConfig::default()));
        let tcp_sup = cdu_transport::ReconnectSupervisor::new(Arc::new(cdu_transport::TcpTarget(transport.clone())), Duration::from_secs(1));
        let rtu_sup = cdu_transport::ReconnectSupervisor::new(Arc::new(cdu_transport::RtuTarget(transport.clone())), Duration::from_secs(1));
        let writer = crate::writer::ComponentWriter::new(config.clone(), processed.clone(), transport, tcp_sup, rtu_sup, 1);
        let dispatcher = WriteDispatcher::new(writer, config.clone(), processed.clone());
        dispatcher.install();
        let manager = AutoControlManager::new(config, processed.clone(), dispatcher);
        manager.install();
        (manager, processed)
    }

    #[test]
    fn flow_only_walkthrough_matches_scenario_numbers() {
        let dir = seed_config_dir(100.0);
        let (manager, processed) = manager(dir.path(), 100.0);
        processed.set_register(address::TARGET_FLOW, 500, false);
        processed.set_register(address::FLOW_VALUE + 1, 400, false);
        processed.set_register(address::CONTROL_MODE, 3, false);
        manager.run_flow_only();
        assert_eq!(*manager.last_pump_duty.lock().unwrap(), 10.0);
        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), 1000);
    }

    #[test]
    fn control_mode_transition_to_three_forces_pv_to_full_open() {
        let dir = seed_config_dir(100.0);
        let (manager, processed) = manager(dir.path(), 100.0);
        processed.set_coil(address::WRITE_ENABLE, true, true);
        processed.set_register(address::CONTROL_MODE, 3, true);
        assert_eq!(processed.get_register(address::PV_DUTY_WRITE), 10000);
        manager.stop();
    }

    #[test]
    fn manual_mode_requests_stop() {
        let dir = seed_config_dir(100.0);
        let (manager, processed) = manager(dir.path(), 100.0);
        processed.set_coil(address::WRITE_ENABLE, true, true);
        processed.set_register(address::CONTROL_MODE, 3, true);
        assert!(manager.is_running());
        processed.set_register(address::CONTROL_MODE, 1, true);
        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn write_enable_dropping_requests_stop_without_needing_mode_change() {
        let dir = seed_config_dir(100.0);
        let (manager, processed) = manager(dir.path(), 100.0);
        processed.set_coil(address::WRITE_ENABLE, true, true);
        processed.set_register(address::CONTROL_MODE, 3, true);
        assert!(manager.is_running());
        processed.set_coil(address::WRITE_ENABLE, false, true);
        manager.stop();
        assert!(!manager.is_running());
    }
}
