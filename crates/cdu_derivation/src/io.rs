use cdu_config::ComponentParam;
use cdu_registers::{address, ProcessedRegisterMap, RawRegisterImage};

/// Read-only IO input passthrough: raw coil (device-specific address) mirrored
/// into the fixed `IO_INPUT_READ` block at the component's configured index.
pub fn process_io_input(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16) {
    let value = cfg.local_address("r_b_input_address").map(|addr| raw.coil(addr)).unwrap_or(false);
    processed.set_coil(address::IO_INPUT_READ + index, value, false);
}

/// IO output echo: current hardware state of a writable output coil mirrored
/// into the fixed `IO_OUTPUT_READ` block (distinct from `IO_OUTPUT_WRITE`,
/// the manual-override target).
pub fn process_io_output(cfg: &ComponentParam, raw: &RawRegisterImage, processed: &ProcessedRegisterMap, index: u16) {
    let value = cfg.local_address("rw_b_output_address").map(|addr| raw.coil(addr)).unwrap_or(false);
    processed.set_coil(address::IO_OUTPUT_READ + index, value, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_echoes_raw_coil_at_configured_address() {
        let cfg = ComponentParam::from_config(
            "DoorSwitch".into(),
            cdu_config::ComponentType::Input,
            json!({"r_b_input_address": {"local": 40}}).as_object().unwrap().clone(),
        );
        let raw = RawRegisterImage::new();
        raw.update_coils(40, &[true]);
        let processed = ProcessedRegisterMap::new();
        process_io_input(&cfg, &raw, &processed, 2);
        assert!(processed.get_coil(address::IO_INPUT_READ + 2));
    }

    #[test]
    fn output_echo_defaults_false_when_unconfigured() {
        let cfg = ComponentParam::from_config(
            "Relay1".into(),
            cdu_config::ComponentType::Output,
            json!({}).as_object().unwrap().clone(),
        );
        let raw = RawRegisterImage::new();
        let processed = ProcessedRegisterMap::new();
        process_io_output(&cfg, &raw, &processed, 0);
        assert!(!processed.get_coil(address::IO_OUTPUT_READ));
    }
}
