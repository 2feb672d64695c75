use std::time::Instant;

use cdu_config::ComponentParam;
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};

use crate::conv::to_u16;
use crate::fault::FaultTimers;

const CONFIRM_SECS: u64 = 8;

/// Pump state machine: same shape as the fan, gated by an additional
/// `duty >= min_duty` precondition. Duty/voltage/temperature are rescaled
/// into the processed map's fixed-point convention on the way out.
pub fn process_pump(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let switch_addr = address::PUMP_SWITCH_READ + index;
    let switch_on = raw.coil(switch_addr);

    let duty_cycle = cfg
        .local_address("rw_d_duty_register_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0) as i64;
    let current = cfg
        .local_address("r_d_current_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0) as i64;
    let speed = cfg
        .local_address("r_d_speed_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0);
    let voltage = cfg
        .local_address("r_d_voltage_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0) as i64;
    let temperature = cfg
        .local_address("r_d_temperature_address")
        .map(|addr| raw.register(addr))
        .unwrap_or(0) as i64;

    let min_duty = cfg.int_field("min_duty", 0);
    let key = format!("pump_{index}");
    let state = if switch_on && duty_cycle >= min_duty {
        if current >= 100 {
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
    processed.set_register(address::PUMP_DUTY_READ + index, to_u16(duty_cycle * 100), false);
    processed.set_register(address::PUMP_CURRENT + index, u16_current, false);
    processed.set_register(address::PUMP_SPEED + index, speed, false);
    processed.set_register(address::PUMP_STATUS + index, state, false);
    processed.set_register(address::PUMP_VOLTAGE + index, to_u16(voltage * 100), false);
    processed.set_register(address::PUMP_TEMPERATURE + index, to_u16(temperature * 10), false);
}
