//! Port traits: the boundary between protocol logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Client (protocol core)
//! ```
//!
//! The pub/sub connection, the flash-write API and the time source are
//! driven adapters. The [`Client`](crate::dispatch::Client) consumes them
//! via generics, so the routing, correlation and firmware logic never
//! touches a socket or a partition directly and is fully testable on host.

use embassy_time::Instant;

// ───────────────────────────────────────────────────────────────
// Transport port (pub/sub connection)
// ───────────────────────────────────────────────────────────────

/// Delivery guarantee requested for a publish or subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::AtLeastOnce
        } else {
            Self::AtMostOnce
        }
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Inbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish-subscribe connection to the platform broker.
///
/// Connection management, TLS and reconnects belong to the implementation.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Unsubscribing from a topic that is not subscribed must succeed.
    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Service the connection and hand back the next received message,
    /// if any. Non-blocking.
    fn poll(&mut self) -> Option<Inbound>;

    /// Size of the buffer incoming messages are read into.
    fn receive_buffer_size(&self) -> usize;

    fn set_receive_buffer_size(&mut self, size: usize) -> Result<(), Self::Error>;
}

// ───────────────────────────────────────────────────────────────
// Firmware sink port (flash-write API)
// ───────────────────────────────────────────────────────────────

/// Destination of a downloaded firmware image.
///
/// `begin` is called once before the first byte, `write` for every
/// accepted chunk, then exactly one of `commit` (image verified) or
/// `abort` (transfer failed).
pub trait FirmwareSink {
    type Error: core::fmt::Debug;

    fn begin(&mut self, image_size: usize) -> Result<(), Self::Error>;

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;

    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source for chunk deadlines.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Host clock backed by `std::time::Instant`, counting from creation.
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.start.elapsed().as_micros() as u64)
    }
}
