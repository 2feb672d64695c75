//! The operator-facing Modbus RTU slave: a thin `tokio_modbus::server::Service`
//! over [`cdu_registers::ProcessedRegisterMap`], wrapped in a single
//! restart-on-failure thread.

pub mod service;
pub mod slave;

pub use service::RegisterMapService;
pub use slave::HmiRtuSlave;
