//! Unified error types for the protocol engine.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! caller-facing error handling uniform. All variants are `Copy` so they can
//! be returned from dispatch paths without allocation. Nothing here is ever
//! fatal: the worst outcome of any failure is a dropped message or a firmware
//! session that ends in `FAILED`.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible client operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An inbound payload was not valid JSON or had the wrong shape.
    Deserialize,
    /// An outbound value could not be encoded (e.g. a non-finite float).
    Serialize,
    /// A bounded registry or the pending-request table is full.
    CapacityExceeded,
    /// The transport refused a publish, subscribe, unsubscribe or resize.
    Transport,
    /// The encoded payload is longer than the configured maximum.
    PayloadTooLarge { len: usize, max: usize },
    /// The outbound object carries more fields than allowed.
    TooManyFields { count: usize, max: usize },
    /// A caller-supplied argument was empty or otherwise unusable.
    InvalidArgument(&'static str),
    /// A firmware update could not be started or failed.
    Firmware(FirmwareError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deserialize => write!(f, "unable to deserialize payload"),
            Self::Serialize => write!(f, "unable to serialize payload"),
            Self::CapacityExceeded => write!(f, "callback capacity exceeded"),
            Self::Transport => write!(f, "transport operation failed"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds buffer of {max} bytes")
            }
            Self::TooManyFields { count, max } => {
                write!(f, "{count} JSON fields exceed the limit of {max}")
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Firmware(e) => write!(f, "firmware: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Firmware errors
// ---------------------------------------------------------------------------

/// Failure reasons of a firmware transfer session.
///
/// Only `AlreadyInProgress` is ever returned to a caller; the rest are
/// recorded on the session and surfaced through `current_fw_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// A session is already registered.
    AlreadyInProgress,
    /// The received image does not match the advertised checksum.
    ChecksumMismatch,
    /// Chunk timeouts or write failures used up the retry budget.
    RetryExhausted,
    /// The server advertised a checksum algorithm other than MD5.
    UnsupportedAlgorithm,
    /// The firmware sink refused to begin, write or commit.
    WriteError,
    /// The transport receive buffer could not be grown for chunk traffic.
    BufferResize,
    /// The chunk response topic could not be subscribed.
    SubscribeFailed,
    /// The chunk stream ended short of, or ran past, the advertised size.
    InvalidImage,
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "update session already in progress"),
            Self::ChecksumMismatch => write!(f, "checksum verification failed"),
            Self::RetryExhausted => write!(f, "retry budget exhausted"),
            Self::UnsupportedAlgorithm => write!(f, "checksum algorithm not supported"),
            Self::WriteError => write!(f, "firmware write failed"),
            Self::BufferResize => write!(f, "not enough memory for chunk buffer"),
            Self::SubscribeFailed => write!(f, "unable to subscribe to chunk responses"),
            Self::InvalidImage => write!(f, "image size does not match advertised size"),
        }
    }
}

impl From<FirmwareError> for Error {
    fn from(e: FirmwareError) -> Self {
        Self::Firmware(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
