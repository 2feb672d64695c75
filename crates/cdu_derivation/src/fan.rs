use std::time::Instant;

use cdu_config::ComponentParam;
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};

use crate::conv::to_u16;
use crate::fault::FaultTimers;

const CONFIRM_SECS: u64 = 8;

/// Fan state machine: `{0=stopped, 1=running, 2=fault}`. Duty cycle
/// and speed are not wired to any raw register on this hardware revision
/// and are reported as 0.
pub fn process_fan(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let switch_addr = address::FAN_SWITCH_READ + index;
    let switch_on = raw.coil(switch_addr);

    let current = cfg
        .local_address("r_d_current_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0) as i64;

    let duty_cycle: u16 = 0;
    let speed: u16 = 0;

    let key = format!("fan_{index}");
    let state = if switch_on {
        if current > 100 {
            timers.clear(&key);
            1
        } else if timers.elapsed(&key, now).as_secs() >= CONFIRM_SECS {
            2
        } else {
            0
        }
    } else {
        timers.clear(&key);
        0
    };

    let u16_current = to_u16(current);
    processed.set_coil(switch_addr, switch_on, false);
    processed.set_register(address::FAN_DUTY_READ + index, duty_cycle, false);
    processed.set_register(address::FAN_CURRENT + index, u16_current, false);
    processed.set_register(address::FAN_SPEED + index, speed, false);
    processed.set_register(address::FAN_STATUS + index, state, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn fan_config() -> ComponentParam {
        ComponentParam::from_config(
            "Fan1".into(),
            cdu_config::ComponentType::Fan,
            json!({"r_d_current_address": {"local": 50}}).as_object().unwrap().clone(),
        )
    }

    #[test]
    fn switch_off_is_stopped_and_clears_timer() {
        let cfg = fan_config();
        let raw = RawRegisterImage::new();
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_fan(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::FAN_STATUS), 0);
    }

    #[test]
    fn switch_on_with_healthy_current_is_running() {
        let cfg = fan_config();
        let raw = RawRegisterImage::new();
        raw.update_coils(address::FAN_SWITCH_READ, &[true]);
        raw.update_registers(50, &[150]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_fan(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::FAN_STATUS), 1);
        assert_eq!(processed.get_register(address::FAN_CURRENT), 150);
    }

    #[test]
    fn low_current_confirms_fault_after_8_seconds() {
        let cfg = fan_config();
        let raw = RawRegisterImage::new();
        raw.update_coils(address::FAN_SWITCH_READ, &[true]);
        raw.update_registers(50, &[10]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        let start = Instant::now();
        process_fan(&cfg, &raw, &processed, 0, &timers, start);
        assert_eq!(processed.get_register(address::FAN_STATUS), 0);
        process_fan(&cfg, &raw, &processed, 0, &timers, start + Duration::from_secs(9));
        assert_eq!(processed.get_register(address::FAN_STATUS), 2);
    }
}
