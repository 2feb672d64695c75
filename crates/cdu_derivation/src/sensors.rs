use std::time::Instant;

use cdu_config::ComponentParam;
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};

use crate::conv::to_u16;
use crate::fault::FaultTimers;

const CONFIRM_SECS: u64 = 8;

struct Calibration {
    offset1: f64,
    offset2: f64,
    gain1: f64,
    gain2: f64,
    gain3: f64,
}

impl Calibration {
    fn from(cfg: &ComponentParam) -> Self {
        Self {
            offset1: cfg.float_field("offset1", 0.0),
            offset2: cfg.float_field("offset2", 0.0),
            gain1: cfg.float_field("gain1", 1.0),
            gain2: cfg.float_field("gain2", 1.0),
            gain3: cfg.float_field("gain3", 1.0),
        }
    }

    /// `(raw + offset1 + offset2) * gain1 * gain2 * gain3`, used by the
    /// temperature and environment channels.
    fn additive(&self, raw: i64) -> f64 {
        (raw as f64 + self.offset1 + self.offset2) * self.gain1 * self.gain2 * self.gain3
    }

    /// `(raw + offset1) * gain1 * gain2 * gain3 + offset2`, used by the
    /// pressure/flow/pH channels.
    fn pre_gain(&self, raw: i64) -> f64 {
        (raw as f64 + self.offset1) * self.gain1 * self.gain2 * self.gain3 + self.offset2
    }
}

fn raw_value(cfg: &ComponentParam, raw: &RawRegisterImage, address_field: &str) -> i64 {
    cfg.local_address(address_field).map(|a| raw.register(a)).unwrap_or(0) as i64
}

/// `{0=sensor_fault, 1=normal, 2=below_min, 3=above_max}`.
pub fn process_temperature(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let calib = Calibration::from(cfg);
    let raw_val = raw_value(cfg, raw, "r_d_temperature_address");
    let decimals = cfg.int_field("r_d_temperature_decimals", 1) as u32;
    let min_v = cfg.float_field("min_temperature", -273.0);
    let max_v = cfg.float_field("max_temperature", 999.0);

    let calc_val = calib.additive(raw_val);
    let calc_val_int = calc_val.round() as i64;

    let key = format!("T_{index}");
    let state = if calc_val > 2000.0 || calc_val < -1000.0 {
        confirm_or_hold(timers, &key, now, 0)
    } else if calc_val < min_v {
        confirm_or_hold(timers, &key, now, 2)
    } else if calc_val > max_v * 10f64.powi(decimals as i32) {
        confirm_or_hold(timers, &key, now, 3)
    } else {
        timers.clear(&key);
        1
    };

    let value = to_u16(calc_val_int);
    processed.set_register(address::TEMP_VALUE + index, value, false);
    processed.set_register(address::TEMP_DIFF + index, 0, false);
    processed.set_register(address::TEMP_STATUS + index, state, false);
}

/// `{0=sensor_fault, 1=normal, 2=below_min, 3=above_max}`, 8 s confirmation.
pub fn process_pressure(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let calib = Calibration::from(cfg);
    let raw_val = raw_value(cfg, raw, "r_d_pressure_address");
    let decimals = cfg.int_field("r_d_pressure_decimals", 2) as u32;
    let min_v = cfg.float_field("min_pressure", -999.0);
    let max_v = cfg.float_field("max_pressure", 999.0);

    let calc_val = calib.pre_gain(raw_val);
    let scale = 10f64.powi(decimals as i32);
    let calc_val_int = (calc_val * scale).round() as i64;

    let key = format!("P_{index}");
    let state = if (calc_val_int as f64) < -50.0 {
        confirm_or_hold(timers, &key, now, 0)
    } else if (calc_val_int as f64) < min_v {
        confirm_or_hold(timers, &key, now, 2)
    } else if (calc_val_int as f64) > max_v * scale {
        confirm_or_hold(timers, &key, now, 3)
    } else {
        timers.clear(&key);
        1
    };

    let value = to_u16(calc_val_int);
    processed.set_register(address::PRESS_VALUE + index, value, false);
    processed.set_register(address::PRESS_STATUS + index, state, false);
}

/// Same shape as pressure, bounded by `min_flow`/`max_flow`.
pub fn process_flow(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let calib = Calibration::from(cfg);
    let raw_val = raw_value(cfg, raw, "r_d_flow_address");
    let decimals = cfg.int_field("r_d_flow_decimals", 1) as u32;
    let min_v = cfg.float_field("min_flow", -999.0);
    let max_v = cfg.float_field("max_flow", 999.0);

    let calc_val = calib.pre_gain(raw_val);
    let scale = 10f64.powi(decimals as i32);
    let calc_val_int = (calc_val * scale).round() as i64;

    let key = format!("F_{index}");
    let state = if calc_val < -20.0 {
        confirm_or_hold(timers, &key, now, 0)
    } else if calc_val < min_v {
        confirm_or_hold(timers, &key, now, 2)
    } else if calc_val > max_v {
        confirm_or_hold(timers, &key, now, 3)
    } else {
        timers.clear(&key);
        1
    };

    let value = to_u16(calc_val_int);
    processed.set_register(address::FLOW_VALUE + index, value, false);
    processed.set_register(address::FLOW_STATUS + index, state, false);
}

/// Binary state `{0=fault, 1=normal}`, 8 s confirmation on out-of-range.
pub fn process_ph(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let calib = Calibration::from(cfg);
    let raw_val = raw_value(cfg, raw, "r_d_ph_address");
    let decimals = cfg.int_field("r_d_ph_decimals", 1) as u32;
    let min_v = cfg.float_field("min_ph", 0.0);
    let max_v = cfg.float_field("max_ph", 14.0);

    let calc_val = calib.pre_gain(raw_val);
    let scale = 10f64.powi(decimals as i32);
    let calc_val_int = (calc_val * scale).round() as i64;

    let key = format!("PH_{index}");
    let state = if calc_val < min_v || calc_val > max_v {
        confirm_or_hold(timers, &key, now, 0)
    } else {
        timers.clear(&key);
        1
    };

    let value = to_u16(calc_val_int);
    processed.set_register(address::PH_VALUE + index, value, false);
    processed.set_register(address::PH_STATUS + index, state, false);
}

struct EnvironmentRule {
    extreme_low: f64,
    extreme_high: f64,
    default_min: f64,
    default_max: f64,
}

/// Per-channel extreme-vs-range rules: channel 1 = temperature,
/// channel 2 = humidity, channel 3 = dew point; any other index falls back
/// to the configured `min_pht`/`max_pht` bounds with generic extremes.
fn environment_rule(index: u16, cfg: &ComponentParam) -> EnvironmentRule {
    match index {
        1 => EnvironmentRule { extreme_low: -100.0, extreme_high: 200.0, default_min: 0.0, default_max: 60.0 },
        2 => EnvironmentRule { extreme_low: -10.0, extreme_high: 100.0, default_min: 0.0, default_max: 80.0 },
        3 => EnvironmentRule { extreme_low: -50.0, extreme_high: 80.0, default_min: -20.0, default_max: 50.0 },
        _ => EnvironmentRule {
            extreme_low: -100.0,
            extreme_high: 200.0,
            default_min: cfg.float_field("min_pht", -273.0),
            default_max: cfg.float_field("max_pht", 999.0),
        },
    }
}

/// `{0=sensor_fault, 1=normal, 2=below_min, 3=above_max}`.
pub fn process_environment(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16, timers: &FaultTimers, now: Instant) {
    let calib = Calibration::from(cfg);
    let raw_val = raw_value(cfg, raw, "r_d_pht_address");
    let decimals = cfg.int_field("r_d_pht_decimals", 1) as u32;
    let rule = environment_rule(index, cfg);
    let min_v = cfg.float_field("min_pht", rule.default_min);
    let max_v = cfg.float_field("max_pht", rule.default_max);

    let calc_val = calib.additive(raw_val);
    let calc_val_int = (calc_val / 10.0).round() as i64;
    let scale = 10f64.powi(decimals as i32);

    let key = format!("PHT_{index}");
    let state = if calc_val > rule.extreme_high * scale || calc_val < rule.extreme_low * scale {
        confirm_or_hold(timers, &key, now, 0)
    } else if calc_val < min_v {
        confirm_or_hold(timers, &key, now, 2)
    } else if calc_val > max_v * scale {
        confirm_or_hold(timers, &key, now, 3)
    } else {
        timers.clear(&key);
        1
    };

    let value = to_u16(calc_val_int);
    processed.set_register(address::ENV_VALUE + index, value, false);
    processed.set_register(address::ENV_STATUS + index, state, false);
}

/// Returns `fault_state` once `key`'s abnormal condition has held for the
/// 8 s confirmation window, otherwise holds at the prior normal state (1).
fn confirm_or_hold(timers: &FaultTimers, key: &str, now: Instant, fault_state: u16) -> u16 {
    if timers.elapsed(key, now).as_secs() >= CONFIRM_SECS {
        fault_state
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_config() -> ComponentParam {
        ComponentParam::from_config(
            "T1".into(),
            cdu_config::ComponentType::Sensor,
            json!({"r_d_temperature_address": {"local": 1}}).as_object().unwrap().clone(),
        )
    }

    #[test]
    fn normal_temperature_clears_timer_and_stores_value() {
        let cfg = temp_config();
        let raw = RawRegisterImage::new();
        raw.update_registers(1, &[250]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_temperature(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::TEMP_STATUS), 1);
        assert_eq!(processed.get_register(address::TEMP_VALUE), 250);
    }

    #[test]
    fn above_max_is_not_confirmed_on_first_sample() {
        let cfg = temp_config();
        let raw = RawRegisterImage::new();
        raw.update_registers(1, &[9999]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        process_temperature(&cfg, &raw, &processed, 0, &timers, Instant::now());
        assert_eq!(processed.get_register(address::TEMP_STATUS), 1);
    }

    #[test]
    fn ph_out_of_range_confirms_fault_after_8_seconds() {
        let cfg = ComponentParam::from_config(
            "PH1".into(),
            cdu_config::ComponentType::Sensor,
            json!({"r_d_ph_address": {"local": 5}}).as_object().unwrap().clone(),
        );
        let raw = RawRegisterImage::new();
        raw.update_registers(5, &[200]);
        let processed = ProcessedRegisterMap::new();
        let timers = FaultTimers::new();
        let start = Instant::now();
        process_ph(&cfg, &raw, &processed, 0, &timers, start);
        assert_eq!(processed.get_register(address::PH_STATUS), 1);
        process_ph(&cfg, &raw, &processed, 0, &timers, start + std::time::Duration::from_secs(9));
        assert_eq!(processed.get_register(address::PH_STATUS), 0);
    }
}
