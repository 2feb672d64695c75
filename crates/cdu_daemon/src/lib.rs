//! Composition root for the CDU controller: loads configuration, wires
//! every crate's handles together in dependency order, and exposes the
//! running [`bootstrap::Controller`] for `main` to hold onto.

pub mod bootstrap;
pub mod error;
pub mod lock;

pub use bootstrap::{bootstrap, Controller};
pub use error::DaemonError;
pub use lock::InstanceLock;
