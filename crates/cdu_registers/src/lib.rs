//! The register images the rest of the controller is built around: the
//! dense, semantically-normalized [`map::ProcessedRegisterMap`] served to
//! the HMI/REST surfaces, and the PCBA-native [`raw::RawRegisterImage`]
//! written by the polling scheduler.

pub mod address;
pub mod map;
pub mod raw;

pub use map::ProcessedRegisterMap;
pub use raw::RawRegisterImage;
