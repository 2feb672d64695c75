use cdu_registers::{address, ProcessedRegisterMap};

/// One-shot "read→write mirror": copies the current read-region
/// values into the corresponding write-region so a freshly-booted HMI never
/// sees a write setpoint drift from the hardware's actual last-known state.
/// Callers are responsible for the guarding flag+lock; this just performs
/// the copy, grounded in `_sync_read_to_write_registers_once`.
pub fn mirror_read_to_write(processed: &ProcessedRegisterMap) {
    for i in 0..address::PUMP_BLOCK_LEN {
        let value = processed.get_register(address::PUMP_DUTY_READ + i);
        processed.set_register(address::PUMP_DUTY_WRITE + i, value, false);
    }
    for i in 0..address::PV_BLOCK_LEN {
        let value = processed.get_register(address::PV_DUTY_READ + i);
        processed.set_register(address::PV_DUTY_WRITE + i, value, false);
    }
    for i in 0..address::FAN_BLOCK_LEN {
        let value = processed.get_register(address::FAN_DUTY_READ + i);
        processed.set_register(address::FAN_DUTY_WRITE + i, value, false);
    }
    for i in 0..address::FAN_SWITCH_WRITE_LEN {
        let value = processed.get_coil(address::FAN_SWITCH_READ + i);
        processed.set_coil(address::FAN_SWITCH_WRITE + i, value, false);
    }
    for i in 0..address::PUMP_SWITCH_WRITE_LEN {
        let value = processed.get_coil(address::PUMP_SWITCH_READ + i);
        processed.set_coil(address::PUMP_SWITCH_WRITE + i, value, false);
    }
    for i in 0..address::IO_OUTPUT_WRITE_LEN {
        let value = processed.get_coil(address::IO_OUTPUT_READ + i);
        processed.set_coil(address::IO_OUTPUT_WRITE + i, value, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_pump_duty_read_into_write_region() {
        let processed = ProcessedRegisterMap::new();
        processed.set_register(address::PUMP_DUTY_READ, 3000, false);
        mirror_read_to_write(&processed);
        assert_eq!(processed.get_register(address::PUMP_DUTY_WRITE), 3000);
    }

    #[test]
    fn mirrors_fan_switch_coils_into_write_region() {
        let processed = ProcessedRegisterMap::new();
        processed.set_coil(address::FAN_SWITCH_READ + 2, true, false);
        mirror_read_to_write(&processed);
        assert!(processed.get_coil(address::FAN_SWITCH_WRITE + 2));
    }
}
