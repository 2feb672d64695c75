//! Address map constants. Every constant here is a first address; the
//! accompanying `_LEN` is the number of consecutive elements of that block.

// --- Coils ---

pub const WRITE_ENABLE: u16 = 0;

pub const FAN_SWITCH_READ: u16 = 1;
pub const FAN_SWITCH_READ_LEN: u16 = 31;
pub const FAN_SWITCH_WRITE: u16 = 33;
pub const FAN_SWITCH_WRITE_LEN: u16 = 31;

pub const PUMP_SWITCH_READ: u16 = 65;
pub const PUMP_SWITCH_READ_LEN: u16 = 31;
pub const PUMP_SWITCH_WRITE: u16 = 97;
pub const PUMP_SWITCH_WRITE_LEN: u16 = 31;

pub const FAN_BATCH: u16 = 128;
pub const PUMP_BATCH: u16 = 129;

pub const IO_INPUT_READ: u16 = 200;
pub const IO_INPUT_READ_LEN: u16 = 32;
pub const IO_OUTPUT_READ: u16 = 233;
pub const IO_OUTPUT_READ_LEN: u16 = 32;
pub const IO_OUTPUT_WRITE: u16 = 266;
pub const IO_OUTPUT_WRITE_LEN: u16 = 32;

pub const IO_OUTPUT_BATCH: u16 = 298;

pub const COIL_COUNT: u16 = 379; // addresses 0..=378

// --- Holding registers ---

pub const TARGET_FLOW: u16 = 395;
pub const TARGET_TEMP: u16 = 396;
pub const TARGET_DP: u16 = 397;
pub const CONTROL_MODE: u16 = 399;

pub const FAN_DUTY_READ: u16 = 400;
pub const FAN_DUTY_WRITE: u16 = 432;
pub const FAN_CURRENT: u16 = 464;
pub const FAN_SPEED: u16 = 496;
pub const FAN_STATUS: u16 = 528;
pub const FAN_BATCH_DUTY: u16 = 560;
pub const FAN_BLOCK_LEN: u16 = 32;

pub const PUMP_DUTY_READ: u16 = 600;
pub const PUMP_DUTY_WRITE: u16 = 632;
pub const PUMP_CURRENT: u16 = 664;
pub const PUMP_SPEED: u16 = 696;
pub const PUMP_STATUS: u16 = 728;
pub const PUMP_VOLTAGE: u16 = 760;
pub const PUMP_TEMPERATURE: u16 = 764;
pub const PUMP_BATCH_DUTY: u16 = 799;
pub const PUMP_BLOCK_LEN: u16 = 32;
pub const PUMP_VOLT_TEMP_LEN: u16 = 4;

pub const PV_DUTY_READ: u16 = 800;
pub const PV_DUTY_WRITE: u16 = 808;
pub const PV_VOLTAGE: u16 = 816;
pub const PV_STATUS: u16 = 824;
pub const PV_BATCH_DUTY: u16 = 832;
pub const PV_BLOCK_LEN: u16 = 8;

pub const TEMP_VALUE: u16 = 900;
pub const TEMP_DIFF: u16 = 932;
pub const TEMP_STATUS: u16 = 940;
pub const TEMP_VALUE_LEN: u16 = 32;
pub const TEMP_DIFF_LEN: u16 = 8;

pub const PRESS_VALUE: u16 = 1000;
pub const PRESS_DIFF: u16 = 1032;
pub const PRESS_STATUS: u16 = 1040;
pub const PRESS_VALUE_LEN: u16 = 32;
pub const PRESS_DIFF_LEN: u16 = 8;

pub const FLOW_VALUE: u16 = 1100;
pub const FLOW_STATUS: u16 = 1108;
pub const FLOW_LEN: u16 = 8;
pub const COOLING_CAPACITY: u16 = 1116;
pub const COOLING_CAPACITY_LEN: u16 = 4;
pub const PH_VALUE: u16 = 1120;
pub const PH_STATUS: u16 = 1128;
pub const PH_LEN: u16 = 8;
pub const ENV_VALUE: u16 = 1136;
pub const ENV_STATUS: u16 = 1152;
pub const ENV_LEN: u16 = 16;

pub const REGISTER_COUNT: u32 = 1168;

/// Defaults applied at bootstrap: everything else starts at zero.
pub fn apply_defaults(map: &mut crate::map::ProcessedRegisterMap) {
    map.set_register(CONTROL_MODE, 1, false);
    map.set_register(TARGET_FLOW, 500, false);
    map.set_register(TARGET_TEMP, 250, false);
    map.set_register(TARGET_DP, 50, false);
    for i in 0..PV_BLOCK_LEN {
        map.set_register(PV_DUTY_WRITE + i, 10000, false);
    }
}
