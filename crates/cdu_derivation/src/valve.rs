use std::time::Instant;

use cdu_config::ComponentParam;
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};

use crate::fault::FaultTimers;

const CONFIRM_SECS: u64 = 12;

/// Proportional valve state machine: `{0=standby, 1=running, 2=fault}`.
pub fn process_valve(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let duty_cycle = cfg
        .local_address("rw_d_duty_register_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0);
    let voltage = cfg
        .local_address("r_d_voltage_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0);

    let key = format!("pv_{index}");
    let state = if voltage < 1990 {
        if duty_cycle >= 2000 {
            if timers.elapsed(&key, now).as_secs() >= CONFIRM_SECS {
                2
            } else {
                0
            }
        } else {
            timers.clear(&key);
            0
        }
    } else if duty_cycle < 2000 && (1990..2050).contains(&voltage) {
        timers.clear(&key);
        0
    } else if duty_cycle >= 2000 && voltage >= 2050 {
        timers.clear(&key);
        1
    } else {
        timers.clear(&key);
        0
    };

    processed.set_register(address::PV_DUTY_READ + index, duty_cycle, false);
    processed.set_register(address::PV_VOLTAGE + index, voltage, false);
    processed.set_register(address::PV_STATUS + index, state, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn pv_config() -> ComponentParam {
        ComponentParam::from_config(
            "Pv1".into(),
            cdu_config::ComponentType::ProportionalValve,
            json!({
                "rw_d_duty_register_address": {"local": 20},
                "r_d_voltage_address": {"local": 21},
            })
            .as_object()
            .unwrap()
            .clone(),
        )
    }

    #[test]
    fn running_when_duty_and_voltage_both_high() {
        let cfg = pv_config();
        let raw = RawRegisterImage::new();
        raw.update_registers(20, &[10000]);
        raw.update_registers(21, &[2100]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_valve(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::PV_STATUS), 1);
    }

    #[test]
    fn low_voltage_with_high_duty_confirms_fault_after_12_seconds() {
        let cfg = pv_config();
        let raw = RawRegisterImage::new();
        raw.update_registers(20, &[5000]);
        raw.update_registers(21, &[1000]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        let start = Instant::now();
        process_valve(&cfg, &raw, &processed, 0, &timers, start);
        assert_eq!(processed.get_register(address::PV_STATUS), 0);
        process_valve(&cfg, &raw, &processed, 0, &timers, start + Duration::from_secs(13));
        assert_eq!(processed.get_register(address::PV_STATUS), 2);
    }

    #[test]
    fn low_duty_with_midrange_voltage_is_standby() {
        let cfg = pv_config();
        let raw = RawRegisterImage::new();
        raw.update_registers(20, &[1000]);
        raw.update_registers(21, &[2000]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_valve(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::PV_STATUS), 0);
    }
}
