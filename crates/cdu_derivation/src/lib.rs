//! Derivation pipeline: reads `RawRegisterImage`, applies per-class
//! fault-confirmation state machines and physical-unit conversions, and
//! writes the result into `ProcessedRegisterMap`. Also owns the one-shot
//! boot-time read→write register mirror.

pub mod aggregates;
pub mod conv;
pub mod fan;
pub mod fault;
pub mod io;
pub mod mirror;
pub mod pipeline;
pub mod pump;
pub mod sensors;
pub mod valve;

pub use fault::FaultTimers;
pub use pipeline::DerivationPipeline;
