//! Well-known topics and inbound topic classification.
//!
//! ```text
//!  inbound topic ──▶ classify() ──▶ Route
//!                                    ├─ Rpc
//!                                    ├─ AttributeResponse { request_id }
//!                                    ├─ AttributeUpdate
//!                                    ├─ ProvisionResponse
//!                                    ├─ FirmwareChunk { index }
//!                                    └─ Unknown
//! ```
//!
//! Classification is a pure prefix match; it has no side effects.

pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
pub const ATTRIBUTE_TOPIC: &str = "v1/devices/me/attributes";
pub const ATTRIBUTE_REQUEST_TOPIC: &str = "v1/devices/me/attributes/request";
pub const ATTRIBUTE_RESPONSE_TOPIC: &str = "v1/devices/me/attributes/response";
pub const ATTRIBUTE_RESPONSE_SUBSCRIBE_TOPIC: &str = "v1/devices/me/attributes/response/+";
pub const RPC_TOPIC: &str = "v1/devices/me/rpc";
pub const RPC_SUBSCRIBE_TOPIC: &str = "v1/devices/me/rpc/request/+";
pub const RPC_REQUEST_SEGMENT: &str = "request";
pub const RPC_RESPONSE_SEGMENT: &str = "response";
pub const FIRMWARE_RESPONSE_TOPIC: &str = "v2/fw/response";
pub const FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC: &str = "v2/fw/response/#";
pub const FIRMWARE_REQUEST_TOPIC: &str = "v2/fw/request/0/chunk";
pub const PROVISION_REQUEST_TOPIC: &str = "/provision/request";
pub const PROVISION_RESPONSE_TOPIC: &str = "/provision/response";
pub const CLAIM_TOPIC: &str = "v1/devices/me/claim";

/// Category of an inbound topic, with any parameter embedded in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Rpc,
    AttributeResponse { request_id: u32 },
    AttributeUpdate,
    ProvisionResponse,
    FirmwareChunk { index: u32 },
    Unknown,
}

/// Classify an inbound topic.
///
/// Attribute responses are checked before attribute updates because the
/// update topic is a prefix of the response topic. A response or chunk
/// topic whose numeric suffix does not parse is `Unknown`.
pub fn classify(topic: &str) -> Route {
    if topic.starts_with(RPC_TOPIC) {
        Route::Rpc
    } else if topic.starts_with(ATTRIBUTE_RESPONSE_TOPIC) {
        match numeric_suffix(topic) {
            Some(request_id) => Route::AttributeResponse { request_id },
            None => Route::Unknown,
        }
    } else if topic.starts_with(ATTRIBUTE_TOPIC) {
        Route::AttributeUpdate
    } else if topic.starts_with(PROVISION_RESPONSE_TOPIC) {
        Route::ProvisionResponse
    } else if topic.starts_with(FIRMWARE_RESPONSE_TOPIC) {
        match numeric_suffix(topic) {
            Some(index) => Route::FirmwareChunk { index },
            None => Route::Unknown,
        }
    } else {
        Route::Unknown
    }
}

/// Number after the final `/`.
fn numeric_suffix(topic: &str) -> Option<u32> {
    let (_, tail) = topic.rsplit_once('/')?;
    tail.parse().ok()
}

/// `v1/devices/me/attributes/request/<id>`
pub fn attribute_request_topic(request_id: u32) -> String {
    format!("{ATTRIBUTE_REQUEST_TOPIC}/{request_id}")
}

/// `v2/fw/request/0/chunk/<index>`
pub fn firmware_chunk_topic(index: u32) -> String {
    format!("{FIRMWARE_REQUEST_TOPIC}/{index}")
}

/// The response topic for an RPC request topic: the `request` segment
/// becomes `response`, the request id is kept.
pub fn rpc_response_topic(request_topic: &str) -> String {
    request_topic.replacen(RPC_REQUEST_SEGMENT, RPC_RESPONSE_SEGMENT, 1)
}
