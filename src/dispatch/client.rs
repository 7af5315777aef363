//! The client façade: owns the adapters and every subsystem, routes
//! inbound messages and exposes the publishing API.
//!
//! ```text
//!  Transport::poll ──▶ pump ──▶ on_message ──▶ classify
//!                                               ├─ Rpc              → Rpc::process
//!                                               ├─ AttributeUpdate  → Attributes::process_update
//!                                               ├─ AttributeResponse→ Attributes::process_response
//!                                               ├─ ProvisionResponse→ Provisioning::process
//!                                               └─ FirmwareChunk    → FirmwareSession::on_chunk
//!  Clock::now ──▶ tick ──▶ FirmwareSession::poll (chunk deadline)
//! ```
//!
//! Messages are dispatched one at a time after the transport has handed
//! them over, so handlers never run inside another dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::Instant;
use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::attribute::{AttributeCallback, AttributeData, AttributeSubscription, Attributes};
use super::provision::{self, ProvisionCallback, Provisioning};
use super::publish::Outbound;
use super::rpc::{Rpc, RpcHandler, RpcSubscription};
use crate::config::ClientConfig;
use crate::error::{FirmwareError, Result};
use crate::ota::session::{FirmwareSession, Io};
use crate::ota::state::{FW_METADATA_KEYS, FirmwareState};
use crate::ports::{Clock, FirmwareSink, QoS, Transport};
use crate::topics::{ATTRIBUTE_TOPIC, FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC, Route, TELEMETRY_TOPIC, classify};
use crate::value::{Scalar, TypedValue};

/// Default capacity of each callback registry.
pub const DEFAULT_CAPACITY: usize = 32;

/// Latest firmware attributes, shared between the attribute callbacks
/// that fill it and the client that hands them to the session.
#[derive(Clone, Default)]
struct MetadataInbox(Rc<RefCell<Option<AttributeData>>>);

impl MetadataInbox {
    fn put(&self, data: &AttributeData) {
        *self.0.borrow_mut() = Some(data.clone());
    }

    fn take(&self) -> Option<AttributeData> {
        self.0.borrow_mut().take()
    }
}

/// Device-side client for the IoT platform's pub/sub protocol.
///
/// `N` bounds each callback registry and the pending-request table.
pub struct Client<T, S, C, const N: usize = DEFAULT_CAPACITY>
where
    T: Transport,
    S: FirmwareSink,
    C: Clock,
{
    transport: T,
    sink: S,
    clock: C,
    config: ClientConfig,
    out: Outbound,
    rpc: Rpc<N>,
    attributes: Attributes<N>,
    provisioning: Provisioning,
    firmware: FirmwareSession,
    metadata: MetadataInbox,
    metadata_subscribed: bool,
}

impl<T, S, C, const N: usize> Client<T, S, C, N>
where
    T: Transport,
    S: FirmwareSink,
    C: Clock,
{
    pub fn new(transport: T, sink: S, clock: C, config: ClientConfig) -> Self {
        Self {
            out: Outbound::from_config(&config),
            rpc: Rpc::new(config.rpc_match),
            attributes: Attributes::new(),
            provisioning: Provisioning::new(),
            firmware: FirmwareSession::new(config.firmware.clone()),
            metadata: MetadataInbox::default(),
            metadata_subscribed: false,
            transport,
            sink,
            clock,
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn qos(&self) -> QoS {
        self.out.qos()
    }

    /// Switch between QoS 0 and QoS 1 for later publishes and subscribes.
    pub fn set_qos(&mut self, enabled: bool) {
        self.config.qos = enabled;
        self.out.set_qos(enabled);
    }

    /// Reset every subscription after a fresh connect.
    ///
    /// Registries are cleared and the matching topics unsubscribed, best
    /// effort. A registered firmware session keeps its metadata
    /// subscription; a session waiting for metadata asks for it again and
    /// a download re-requests the awaited chunk.
    pub fn on_connected(&mut self) {
        info!("Client: connected, clearing subscriptions");
        let _ = self.rpc.unsubscribe(&mut self.transport, &self.out);
        let _ = self.attributes.unsubscribe_updates(&mut self.transport, &self.out);
        self.metadata_subscribed = false;
        let _ = self.attributes.unsubscribe_requests(&mut self.transport, &self.out);
        let _ = self.provisioning.unsubscribe(&mut self.transport, &self.out);
        let _ = self.unsubscribe_firmware();
        self.restore_metadata_subscription();

        self.with_firmware(|firmware, io| firmware.resume(io));
        if self.firmware.state() == FirmwareState::Ready
            && self.config.firmware.request_metadata_on_start
        {
            self.request_metadata();
        }
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Dispatch every message the transport has ready. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.transport.poll() {
            self.on_message(&message.topic, &message.payload);
            handled += 1;
        }
        handled
    }

    /// Expire the awaited firmware chunk if its deadline has passed.
    pub fn tick(&mut self) {
        self.with_firmware(|firmware, io| firmware.poll(io));
    }

    /// Route one inbound message to its subsystem.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        debug!("Client: message on '{}' ({} bytes)", topic, payload.len());
        match classify(topic) {
            Route::Rpc => {
                if let Err(e) = self.rpc.process(&mut self.transport, &self.out, topic, payload) {
                    warn!("Client: RPC on '{}' not answered: {}", topic, e);
                }
            }
            Route::AttributeResponse { request_id } => {
                self.attributes.process_response(request_id, payload);
            }
            Route::AttributeUpdate => self.attributes.process_update(payload),
            Route::ProvisionResponse => self.provisioning.process(payload),
            Route::FirmwareChunk { index } => {
                self.with_firmware(|firmware, io| firmware.on_chunk(io, index, payload));
            }
            Route::Unknown => debug!("Client: no route for '{}'", topic),
        }
        self.deliver_metadata();
    }

    // ── Telemetry & client attributes ────────────────────────────

    pub fn send_telemetry(&mut self, values: &[TypedValue]) -> Result<()> {
        self.out.send_values(&mut self.transport, TELEMETRY_TOPIC, values)
    }

    pub fn send_telemetry_value(&mut self, key: &str, value: impl Into<Scalar>) -> Result<()> {
        self.send_telemetry(&[TypedValue::new(key, value)])
    }

    pub fn send_telemetry_json(&mut self, object: &Map<String, Value>) -> Result<()> {
        self.out.send_object(&mut self.transport, TELEMETRY_TOPIC, object)
    }

    pub fn send_telemetry_raw(&mut self, json: &str) -> Result<()> {
        self.out.send_raw(&mut self.transport, TELEMETRY_TOPIC, json)
    }

    pub fn send_attributes(&mut self, values: &[TypedValue]) -> Result<()> {
        self.out.send_values(&mut self.transport, ATTRIBUTE_TOPIC, values)
    }

    pub fn send_attribute_value(&mut self, key: &str, value: impl Into<Scalar>) -> Result<()> {
        self.send_attributes(&[TypedValue::new(key, value)])
    }

    pub fn send_attribute_json(&mut self, object: &Map<String, Value>) -> Result<()> {
        self.out.send_object(&mut self.transport, ATTRIBUTE_TOPIC, object)
    }

    pub fn send_attribute_raw(&mut self, json: &str) -> Result<()> {
        self.out.send_raw(&mut self.transport, ATTRIBUTE_TOPIC, json)
    }

    // ── RPC ──────────────────────────────────────────────────────

    pub fn rpc_subscribe(&mut self, subscriptions: Vec<RpcSubscription>) -> Result<()> {
        self.rpc.subscribe(&mut self.transport, &self.out, subscriptions)
    }

    pub fn rpc_subscribe_one(
        &mut self,
        method: impl Into<String>,
        handler: impl RpcHandler + 'static,
    ) -> Result<()> {
        self.rpc_subscribe(vec![RpcSubscription::new(method, handler)])
    }

    pub fn rpc_unsubscribe(&mut self) -> Result<()> {
        self.rpc.unsubscribe(&mut self.transport, &self.out)
    }

    pub fn rpc_subscriptions(&self) -> usize {
        self.rpc.len()
    }

    // ── Shared attributes ────────────────────────────────────────

    pub fn attributes_subscribe(&mut self, subscriptions: Vec<AttributeSubscription>) -> Result<()> {
        self.attributes
            .subscribe(&mut self.transport, &self.out, subscriptions)
    }

    pub fn attributes_subscribe_one<K: Into<String>>(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        handler: impl AttributeCallback + 'static,
    ) -> Result<()> {
        self.attributes_subscribe(vec![AttributeSubscription::new(keys, handler)])
    }

    /// Drop every attribute update subscription.
    pub fn attributes_unsubscribe(&mut self) -> Result<()> {
        let res = self
            .attributes
            .unsubscribe_updates(&mut self.transport, &self.out);
        self.metadata_subscribed = false;
        self.restore_metadata_subscription();
        res
    }

    pub fn attribute_subscriptions(&self) -> usize {
        self.attributes.update_count()
    }

    /// Request the current value of shared attributes `keys`; `callback`
    /// runs once with the response. Returns the request id.
    pub fn request_shared_attributes(
        &mut self,
        keys: &[&str],
        callback: impl FnOnce(&AttributeData) + 'static,
    ) -> Result<u32> {
        self.attributes
            .request(&mut self.transport, &self.out, keys, Box::new(callback))
    }

    /// Forget every pending attribute request.
    pub fn unsubscribe_attribute_requests(&mut self) -> Result<()> {
        self.attributes
            .unsubscribe_requests(&mut self.transport, &self.out)
    }

    pub fn pending_attribute_requests(&self) -> usize {
        self.attributes.pending_requests()
    }

    // ── Provisioning & claiming ──────────────────────────────────

    pub fn provision_subscribe(&mut self, handler: impl ProvisionCallback + 'static) -> Result<()> {
        self.provisioning
            .subscribe(&mut self.transport, &self.out, handler)
    }

    pub fn provision_unsubscribe(&mut self) -> Result<()> {
        self.provisioning
            .unsubscribe(&mut self.transport, &self.out)
    }

    pub fn send_provision_request(
        &mut self,
        device_name: &str,
        provision_key: &str,
        provision_secret: &str,
    ) -> Result<()> {
        self.provisioning.send_request(
            &mut self.transport,
            &self.out,
            device_name,
            provision_key,
            provision_secret,
        )
    }

    pub fn send_claim_request(&mut self, secret_key: &str, duration_ms: u32) -> Result<()> {
        provision::send_claim_request(&mut self.transport, &self.out, secret_key, duration_ms)
    }

    // ── Firmware ─────────────────────────────────────────────────

    /// Start a firmware update for a device running `title` `version`.
    ///
    /// Returns once the session is registered; the transfer itself is
    /// driven by [`Self::pump`] and [`Self::tick`]. `on_done` runs once
    /// when the session ends, with `true` only for an installed image.
    pub fn start_firmware_update(
        &mut self,
        title: &str,
        version: &str,
        on_done: impl FnOnce(bool) + 'static,
    ) -> Result<()> {
        self.with_firmware(|firmware, io| firmware.begin(io, title, version, Box::new(on_done)))?;

        if let Err(e) = self.subscribe_metadata() {
            self.with_firmware(|firmware, io| firmware.abandon(io));
            return Err(e);
        }
        if self.config.firmware.request_metadata_on_start {
            self.request_metadata();
        }
        self.with_firmware(|firmware, io| firmware.ready(io));
        Ok(())
    }

    pub fn unsubscribe_firmware(&mut self) -> Result<()> {
        self.out
            .unsubscribe(&mut self.transport, FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC)
    }

    pub fn firmware_state(&self) -> FirmwareState {
        self.firmware.state()
    }

    /// Terminal state of the most recent firmware session.
    pub fn firmware_outcome(&self) -> Option<FirmwareState> {
        self.firmware.last_outcome()
    }

    pub fn firmware_error(&self) -> Option<FirmwareError> {
        self.firmware.last_error()
    }

    pub fn firmware_active(&self) -> bool {
        self.firmware.is_registered()
    }

    pub fn current_firmware(&self) -> (&str, &str) {
        (self.firmware.current_title(), self.firmware.current_version())
    }

    /// When [`Self::tick`] next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.firmware.deadline()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn with_firmware<R>(&mut self, f: impl FnOnce(&mut FirmwareSession, &mut Io<'_, T, S>) -> R) -> R {
        let mut io = Io {
            now: self.clock.now(),
            transport: &mut self.transport,
            sink: &mut self.sink,
            out: &self.out,
        };
        f(&mut self.firmware, &mut io)
    }

    fn subscribe_metadata(&mut self) -> Result<()> {
        if self.metadata_subscribed {
            return Ok(());
        }
        let inbox = self.metadata.clone();
        self.attributes_subscribe_one(FW_METADATA_KEYS, move |data: &AttributeData| inbox.put(data))?;
        self.metadata_subscribed = true;
        Ok(())
    }

    fn request_metadata(&mut self) {
        let inbox = self.metadata.clone();
        let requested = self.attributes.request(
            &mut self.transport,
            &self.out,
            &FW_METADATA_KEYS,
            Box::new(move |data: &AttributeData| inbox.put(data)),
        );
        if let Err(e) = requested {
            warn!("Client: firmware attributes not requested: {}", e);
        }
    }

    fn restore_metadata_subscription(&mut self) {
        if self.firmware.is_registered() {
            if let Err(e) = self.subscribe_metadata() {
                warn!("Client: firmware attributes not resubscribed: {}", e);
            }
        }
    }

    fn deliver_metadata(&mut self) {
        if let Some(data) = self.metadata.take() {
            self.with_firmware(|firmware, io| firmware.on_metadata(io, &data));
        }
    }
}
