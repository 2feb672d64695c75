//! JSON configuration loading for the CDU controller.
//!
//! Loads `settings.json` (transport + PID groups), `cdu_120kw_component.json`
//! (device taxonomy with pre-mapped writable fields), and the two task
//! descriptor files (`communication_task.json`, `low_frequency_task.json`).
//! A [`ConfigRepository`] is the single owned handle the rest of the
//! workspace is constructed from.

pub mod component;
pub mod error;
pub mod repository;
pub mod settings;
pub mod task;

pub use component::{ComponentParam, ComponentType, WritableField, WriteKind};
pub use error::ConfigError;
pub use repository::ConfigRepository;
pub use settings::{ModbusHmiSettings, ModbusRtuSettings, ModbusTcpSettings, PidSettings, Settings};
pub use task::{CommOperationType, CommType, TaskDescriptor, TaskLevel};
