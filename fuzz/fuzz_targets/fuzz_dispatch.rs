//! Fuzz target: `Client::on_message`
//!
//! Splits the input into (topic, payload) records and feeds them to a
//! client with RPC, attribute and firmware subscriptions active. The client
//! must never panic, and every reply it publishes must stay within the
//! configured payload limit.
//!
//! cargo fuzz run fuzz_dispatch

#![no_main]

use embassy_time::Instant;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use thingslink::ports::{Clock, FirmwareSink, Inbound, QoS, Transport};
use thingslink::{Client, ClientConfig, TypedValue};

#[derive(Default)]
struct Sink;

impl FirmwareSink for Sink {
    type Error = ();

    fn begin(&mut self, _size: usize) -> Result<(), ()> {
        Ok(())
    }

    fn write(&mut self, _data: &[u8]) -> Result<(), ()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn abort(&mut self) {}
}

struct Wire {
    max_payload: usize,
    buffer: usize,
}

impl Transport for Wire {
    type Error = ();

    fn publish(&mut self, _topic: &str, payload: &[u8], _qos: QoS) -> Result<(), ()> {
        assert!(payload.len() <= self.max_payload, "oversized publish");
        Ok(())
    }

    fn subscribe(&mut self, _topic: &str, _qos: QoS) -> Result<(), ()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _topic: &str) -> Result<(), ()> {
        Ok(())
    }

    fn poll(&mut self) -> Option<Inbound> {
        None
    }

    fn receive_buffer_size(&self) -> usize {
        self.buffer
    }

    fn set_receive_buffer_size(&mut self, size: usize) -> Result<(), ()> {
        self.buffer = size;
        Ok(())
    }
}

struct Frozen;

impl Clock for Frozen {
    fn now(&self) -> Instant {
        Instant::from_millis(0)
    }
}

fuzz_target!(|data: &[u8]| {
    let config = ClientConfig::default();
    let wire = Wire {
        max_payload: config.max_payload_len,
        buffer: 256,
    };
    let mut client: Client<Wire, Sink, Frozen> = Client::new(wire, Sink, Frozen, config);

    let _ = client.rpc_subscribe_one("echo", |params: &Value| {
        TypedValue::new("len", params.to_string().len() as i64)
    });
    let _ = client.attributes_subscribe_one(["mode", "target"], |_: &thingslink::AttributeData| {});
    let _ = client.start_firmware_update("app", "1.0", |_| {});

    // Records are `topic \0 payload \0`, repeated.
    let mut parts = data.split(|b| *b == 0);
    while let (Some(topic), Some(payload)) = (parts.next(), parts.next()) {
        let Ok(topic) = core::str::from_utf8(topic) else {
            continue;
        };
        client.on_message(topic, payload);
        client.tick();
    }
});
