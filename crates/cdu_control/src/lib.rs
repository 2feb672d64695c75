//! Component-level write dispatch and the auto-control loop: everything
//! downstream of a coil/register write landing in the processed map.
//!
//! [`writer::ComponentWriter`] turns named component field writes into
//! retried Modbus I/O. [`dispatch::WriteDispatcher`] is the address-range
//! callback that HMI and REST writes flow through before reaching it.
//! [`auto::AutoControlManager`] drives the same writer from the PID loops
//! in [`pid`] once a control mode other than manual is selected.

pub mod auto;
pub mod dispatch;
pub mod error;
pub mod pid;
pub mod writer;

pub use auto::AutoControlManager;
pub use dispatch::WriteDispatcher;
pub use error::{ControlFault, TaskRejection};
pub use pid::Pid;
pub use writer::ComponentWriter;
