//! Firmware-over-the-air updates pulled chunk by chunk over the broker.

pub mod driver;
pub mod session;
pub mod state;

pub use driver::{Sleeper, run_until_idle};
pub use session::{DoneCallback, FirmwareSession};
pub use state::{FirmwareState, FirmwareTarget};
