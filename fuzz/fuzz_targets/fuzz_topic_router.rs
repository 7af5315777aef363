//! Fuzz target: `topics::classify`
//!
//! Arbitrary topic strings must classify without panicking, and any
//! numeric parameter the router extracts must be the topic's last segment.
//!
//! cargo fuzz run fuzz_topic_router

#![no_main]

use libfuzzer_sys::fuzz_target;
use thingslink::topics::{Route, classify};

fuzz_target!(|data: &[u8]| {
    let Ok(topic) = core::str::from_utf8(data) else {
        return;
    };

    match classify(topic) {
        Route::AttributeResponse { request_id: n } | Route::FirmwareChunk { index: n } => {
            let tail = topic.rsplit('/').next().unwrap_or_default();
            assert_eq!(tail.parse::<u32>().ok(), Some(n), "parameter not taken from last segment");
        }
        _ => {}
    }
});
