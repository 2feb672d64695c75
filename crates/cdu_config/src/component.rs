use serde::Deserialize;
use serde_json::{Map, Value};

/// Device class taxonomy. Closed over the configured set; the controller
/// never needs to reason about devices outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Fan,
    Pump,
    ProportionalValve,
    Output,
    Input,
    Sensor,
}

impl ComponentType {
    /// Maps a `cdu_120kw_component.json` top-level array key to its class.
    pub fn from_array_key(key: &str) -> Option<Self> {
        match key {
            "fans" => Some(Self::Fan),
            "pumps" => Some(Self::Pump),
            "proportional_valve" => Some(Self::ProportionalValve),
            "output" => Some(Self::Output),
            "input" => Some(Self::Input),
            "sensor" => Some(Self::Sensor),
            _ => None,
        }
    }
}

/// Whether a writable field lands on a coil or a holding register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Coil,
    Register,
}

/// One pre-mapped writable field: `rw_b_*_address` → coil, `rw_d_*_address` → register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableField {
    pub kind: WriteKind,
    pub address: u16,
    pub decimals: u8,
    pub range: (Option<i64>, Option<i64>),
}

/// Immutable-after-load device parameters, with writable fields pre-mapped
/// in the order they appear in the config file.
#[derive(Debug, Clone)]
pub struct ComponentParam {
    pub name: String,
    pub comp_type: ComponentType,
    pub enabled: bool,
    pub config: Map<String, Value>,
    pub writable_fields: Vec<(String, WritableField)>,
}

impl ComponentParam {
    pub fn from_config(name: String, comp_type: ComponentType, config: Map<String, Value>) -> Self {
        let enabled = config.get("enabled").and_then(Value::as_bool).unwrap_or(true);
        let writable_fields = precompute_writable_fields(&config);
        Self {
            name,
            comp_type,
            enabled,
            config,
            writable_fields,
        }
    }

    /// First writable field whose name appears as a key in `value_dict`,
    /// in the component's configured field order (never the caller's
    /// iteration order — that's what makes dispatch deterministic).
    pub fn pick_first_writable<'a>(
        &'a self,
        value_dict: &[(&str, i64)],
    ) -> Option<(&'a str, &'a WritableField, i64)> {
        for (field_name, field) in &self.writable_fields {
            if let Some((_, value)) = value_dict.iter().find(|(k, _)| k == field_name) {
                return Some((field_name.as_str(), field, *value));
            }
        }
        None
    }

    /// Integer config field, falling back to `default` when absent or
    /// non-numeric (mirrors Python's `config.get(key, default)`).
    pub fn int_field(&self, key: &str, default: i64) -> i64 {
        self.config
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    /// Floating-point config field, falling back to `default` when absent
    /// or non-numeric. Sensor calibration fields (offsets, gains, min/max)
    /// are declared this way in `cdu_120kw_component.json`.
    pub fn float_field(&self, key: &str, default: f64) -> f64 {
        self.config
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn contains_field(&self, key: &str) -> bool {
        self.config.contains_key(key)
    }

    /// Address nested as `{"local": <u16>}`, the shape every address field uses.
    pub fn local_address(&self, key: &str) -> Option<u16> {
        self.config
            .get(key)?
            .as_object()?
            .get("local")?
            .as_u64()
            .map(|v| v as u16)
    }
}

fn precompute_writable_fields(config: &Map<String, Value>) -> Vec<(String, WritableField)> {
    let mut fields = Vec::new();
    for (key, value) in config {
        let Some(obj) = value.as_object() else { continue };
        if !key.ends_with("address") {
            continue;
        }
        if let Some(local) = obj.get("local").and_then(Value::as_u64) {
            let address = local as u16;
            if key.starts_with("rw_b") {
                fields.push((
                    key.clone(),
                    WritableField {
                        kind: WriteKind::Coil,
                        address,
                        decimals: 0,
                        range: (None, None),
                    },
                ));
            } else if key.starts_with("rw_d") {
                let decimals_key = key.replacen("address", "decimals", 1);
                let decimals = config
                    .get(&decimals_key)
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u8;
                let range = pick_range_from_config(config, key);
                fields.push((
                    key.clone(),
                    WritableField {
                        kind: WriteKind::Register,
                        address,
                        decimals,
                        range,
                    },
                ));
            }
        }
    }
    fields
}

/// Mirrors `_pick_range_from_config`: try the field-specific `{base}_min/_max`
/// pair first, then the generic fallbacks in order.
fn pick_range_from_config(config: &Map<String, Value>, key: &str) -> (Option<i64>, Option<i64>) {
    let base = key.rsplit_once("_address").map(|(b, _)| b).unwrap_or(key);
    let candidates: [(String, String); 4] = [
        (format!("{base}_min"), format!("{base}_max")),
        ("min_duty".to_string(), "max_duty".to_string()),
        ("duty_min".to_string(), "duty_max".to_string()),
        ("min".to_string(), "max".to_string()),
    ];
    for (min_key, max_key) in candidates {
        let min_v = config.get(&min_key).and_then(Value::as_i64);
        let max_v = config.get(&max_key).and_then(Value::as_i64);
        if min_v.is_some() || max_v.is_some() {
            return (min_v, max_v);
        }
    }
    (None, None)
}

/// One `{"name": ..., "config": {...}}` element from a component array.
#[derive(Debug, Deserialize)]
pub(crate) struct ComponentEntry {
    pub name: String,
    pub config: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pump_config() -> Map<String, Value> {
        json!({
            "enabled": true,
            "min_duty": 500,
            "rw_d_duty_register_address": {"local": 632},
            "rw_d_duty_decimals": 1,
            "rw_d_duty_min": 0,
            "rw_d_duty_max": 90,
            "r_d_current_address": {"local": 664},
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn precomputes_writable_register_field_with_range_and_decimals() {
        let param = ComponentParam::from_config("Pump1".into(), ComponentType::Pump, pump_config());
        assert_eq!(param.writable_fields.len(), 1);
        let (name, field) = &param.writable_fields[0];
        assert_eq!(name, "rw_d_duty_register_address");
        assert_eq!(field.kind, WriteKind::Register);
        assert_eq!(field.address, 632);
        assert_eq!(field.decimals, 1);
        assert_eq!(field.range, (Some(0), Some(90)));
    }

    #[test]
    fn float_field_falls_back_to_default_when_absent() {
        let param = ComponentParam::from_config("Pump1".into(), ComponentType::Pump, pump_config());
        assert_eq!(param.float_field("gain1", 1.0), 1.0);
    }

    #[test]
    fn read_only_fields_are_never_writable() {
        let param = ComponentParam::from_config("Pump1".into(), ComponentType::Pump, pump_config());
        assert!(!param
            .writable_fields
            .iter()
            .any(|(k, _)| k == "r_d_current_address"));
    }

    #[test]
    fn pick_first_writable_respects_configured_order_not_caller_order() {
        let mut config = pump_config();
        config.insert(
            "rw_b_switch_address".to_string(),
            json!({"local": 97}),
        );
        // configured order: duty (register) comes first in the map
        let param = ComponentParam::from_config("Pump1".into(), ComponentType::Pump, config);
        let dict = [("rw_b_switch_address", 1i64), ("rw_d_duty_register_address", 42i64)];
        let (field_name, field, value) = param.pick_first_writable(&dict).unwrap();
        assert_eq!(field_name, "rw_d_duty_register_address");
        assert_eq!(field.kind, WriteKind::Register);
        assert_eq!(value, 42);
    }
}
