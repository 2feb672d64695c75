use cdu_registers::{address, ProcessedRegisterMap};

use crate::conv::{from_u16_signed, to_u16};

const DENSITY: f64 = 1.0163; // kg/L water
const SPECIFIC_HEAT_CAPACITY: f64 = 4.182; // kJ/(kg*degC) water

/// `ΔT = ((T4_raw - T1_raw)/1000.0)*1000` rounded, U16 two's-complement.
/// Values are sign-extended before the arithmetic
/// since they were stored via [`to_u16`]; the teacher's literal port omits
/// this and is wrong for negative temperatures, so this diverges in favor
/// of the spec's explicit formula.
pub fn temperature_diff(processed: &ProcessedRegisterMap) -> u16 {
    let t1 = from_u16_signed(processed.get_register(address::TEMP_VALUE)) as f64 / 1000.0;
    let t4 = from_u16_signed(processed.get_register(address::TEMP_VALUE + 3)) as f64 / 1000.0;
    let diff = ((t4 - t1) * 1000.0).round() as i64;
    let value = to_u16(diff);
    processed.set_register(address::TEMP_DIFF, value, false);
    value
}

/// `ΔP = (P4 - P3) * 1000` rounded, U16 two's-complement.
pub fn pressure_diff(processed: &ProcessedRegisterMap) -> u16 {
    let p3 = from_u16_signed(processed.get_register(address::PRESS_VALUE + 2)) as f64 / 1000.0;
    let p4 = from_u16_signed(processed.get_register(address::PRESS_VALUE + 3)) as f64 / 1000.0;
    let diff = ((p4 - p3) * 1000.0).round() as i64;
    let value = to_u16(diff);
    processed.set_register(address::PRESS_DIFF, value, false);
    value
}

/// `cap = F2 * (T3 - T4) * density * specific_heat_capacity / 60` kW, stored
/// as `round(cap*10)` U16; suppressed (register left unchanged) when
/// `|T3-T4| < 1e-12`. `f2_decimals` is F2's own configured `r_d_flow_decimals`
/// (default 1), read from config rather than hardcoded.
pub fn cooling_capacity(processed: &ProcessedRegisterMap, f2_decimals: u8) -> u16 {
    let f2_scale = 10f64.powi(f2_decimals as i32);
    let f2 = from_u16_signed(processed.get_register(address::FLOW_VALUE + 1)) as f64 / f2_scale;
    let t3 = from_u16_signed(processed.get_register(address::TEMP_VALUE + 2)) as f64 / 10.0;
    let t4 = from_u16_signed(processed.get_register(address::TEMP_VALUE + 3)) as f64 / 10.0;
    let delta_t = t3 - t4;

    if delta_t.abs() < 1e-12 {
        return processed.get_register(address::COOLING_CAPACITY);
    }

    let cap_val = f2 * delta_t * DENSITY * SPECIFIC_HEAT_CAPACITY / 60.0;
    let scaled = (cap_val * 10.0).round() as i64;
    let value = to_u16(scaled);
    processed.set_register(address::COOLING_CAPACITY, value, false);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_diff_matches_spec_formula() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::TEMP_VALUE, to_u16(1000), false); // T1 = 1.0
        processed.set_register(address::TEMP_VALUE + 3, to_u16(4000), false); // T4 = 4.0
        let diff = temperature_diff(&processed);
        assert_eq!(diff, 3000);
    }

    #[test]
    fn negative_temperature_diff_encodes_as_twos_complement() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::TEMP_VALUE, to_u16(4000), false);
        processed.set_register(address::TEMP_VALUE + 3, to_u16(1000), false);
        let diff = temperature_diff(&processed);
        assert_eq!(diff, to_u16(-3000));
    }

    #[test]
    fn cooling_capacity_is_suppressed_when_delta_t_is_zero() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::FLOW_VALUE + 1, to_u16(400), false);
        processed.set_register(address::TEMP_VALUE + 2, to_u16(250), false);
        processed.set_register(address::TEMP_VALUE + 3, to_u16(250), false);
        processed.set_register(address::COOLING_CAPACITY, 7, false);
        let value = cooling_capacity(&processed, 1);
        assert_eq!(value, 7);
    }

    #[test]
    fn cooling_capacity_computes_expected_value() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::FLOW_VALUE + 1, to_u16(400), false); // F2 = 40.0 L/min
        processed.set_register(address::TEMP_VALUE + 2, to_u16(300), false); // T3 = 30.0
        processed.set_register(address::TEMP_VALUE + 3, to_u16(250), false); // T4 = 25.0
        let value = cooling_capacity(&processed, 1);
        let expected = (40.0_f64 * 5.0 * DENSITY * SPECIFIC_HEAT_CAPACITY / 60.0 * 10.0).round() as i64;
        assert_eq!(value, to_u16(expected));
    }

    #[test]
    fn cooling_capacity_honors_a_non_default_f2_decimals() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::FLOW_VALUE + 1, to_u16(4000), false); // F2 = 40.0 L/min at decimals=2
        processed.set_register(address::TEMP_VALUE + 2, to_u16(300), false);
        processed.set_register(address::TEMP_VALUE + 3, to_u16(250), false);
        let value = cooling_capacity(&processed, 2);
        let expected = (40.0_f64 * 5.0 * DENSITY * SPECIFIC_HEAT_CAPACITY / 60.0 * 10.0).round() as i64;
        assert_eq!(value, to_u16(expected));
    }
}
