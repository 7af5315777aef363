//! Client configuration parameters
//!
//! All tunable parameters of the protocol engine. Registry capacity is a
//! const generic on [`Client`](crate::dispatch::Client); everything else
//! lives here and can be loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::dispatch::MethodMatch;

/// Core client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Publish and subscribe with QoS 1 instead of QoS 0
    pub qos: bool,
    /// Largest outbound JSON payload in bytes
    pub max_payload_len: usize,
    /// Largest number of fields in one outbound JSON object
    pub max_fields: usize,
    /// How an incoming RPC method name is compared to registered names
    pub rpc_match: MethodMatch,
    /// Firmware transfer tuning
    pub firmware: FirmwareConfig,
}

/// Firmware-over-the-air transfer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Bytes requested per chunk
    pub chunk_size: usize,
    /// How long to wait for one chunk (milliseconds)
    pub chunk_timeout_ms: u64,
    /// Timeouts and write failures tolerated across the whole transfer
    pub retry_budget: u8,
    /// Extra receive-buffer room for topic and packet header
    pub buffer_headroom: usize,
    /// Also request the firmware attributes when a session starts
    pub request_metadata_on_start: bool,
}

impl FirmwareConfig {
    /// Receive-buffer size needed to hold one chunk message.
    pub fn required_buffer_size(&self) -> usize {
        self.chunk_size + self.buffer_headroom
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            qos: false,
            max_payload_len: 256,
            max_fields: 32,
            rpc_match: MethodMatch::Prefix,
            firmware: FirmwareConfig::default(),
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            chunk_timeout_ms: 3000,
            retry_budget: 5,
            buffer_headroom: 50,
            request_metadata_on_start: true,
        }
    }
}
