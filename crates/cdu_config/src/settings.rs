use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level shape of `settings.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub modbus_tcp: ModbusTcpSettings,
    pub modbus_rtu: ModbusRtuSettings,
    pub modbus_hmi: ModbusHmiSettings,
    #[serde(default)]
    pub log: LogSettings,
    pub pid_pump: PidSettings,
    pub pid_pv: PidSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusTcpSettings {
    #[serde(default = "default_tcp_host")]
    pub ip: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_slave")]
    pub slave_id: u8,
}

fn default_tcp_host() -> String {
    "192.168.1.150".to_string()
}
fn default_tcp_port() -> u16 {
    5000
}
fn default_slave() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusRtuSettings {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
    #[serde(default = "default_slave")]
    pub slave_id: u8,
}

fn default_baud() -> u32 {
    9600
}
fn default_bytesize() -> u8 {
    8
}
fn default_parity() -> String {
    "N".to_string()
}
fn default_stopbits() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusHmiSettings {
    pub rtu: ModbusRtuSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One `{Kp, Ki, Kd, Dt, outputmin, outputmax}` group.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PidSettings {
    #[serde(default, rename = "Kp")]
    pub kp: f64,
    #[serde(default, rename = "Ki")]
    pub ki: f64,
    #[serde(default, rename = "Kd")]
    pub kd: f64,
    #[serde(default = "default_dt", rename = "Dt")]
    pub dt: f64,
    #[serde(default, rename = "outputmin")]
    pub output_min: f64,
    #[serde(default, rename = "outputmax")]
    pub output_max: f64,
}

fn default_dt() -> f64 {
    1.0
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = raw.trim_start_matches('\u{feff}');
        serde_json::from_str(raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}
