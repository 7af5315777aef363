//! Thingslink device client library.
//!
//! Speaks the device side of an IoT platform's pub/sub protocol: telemetry
//! and attribute publishing, shared-attribute subscriptions and requests,
//! server-side RPC, provisioning, claiming and chunked firmware updates.
//!
//! The broker connection, the flash-write API and the clock are port
//! traits (see [`ports`]), so everything here runs and is tested on host.

#![deny(unused_must_use)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ota;
pub mod ports;
pub mod topics;
pub mod value;

pub use config::{ClientConfig, FirmwareConfig};
pub use dispatch::{AttributeData, Client};
pub use error::{Error, FirmwareError, Result};
pub use ota::FirmwareState;
pub use value::{Scalar, TypedValue};
