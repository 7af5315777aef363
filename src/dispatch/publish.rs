//! Outbound JSON publishing with size limits.
//!
//! Every payload the client sends goes through [`Outbound`], which enforces
//! the configured field count and payload length before the transport sees
//! it, and maps transport failures to [`Error::Transport`].

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::ports::{QoS, Transport};
use crate::value::TypedValue;

/// Publishing policy shared by all subsystems.
#[derive(Debug, Clone)]
pub struct Outbound {
    qos: QoS,
    max_payload_len: usize,
    max_fields: usize,
}

impl Outbound {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            qos: QoS::from_enabled(config.qos),
            max_payload_len: config.max_payload_len,
            max_fields: config.max_fields,
        }
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, enabled: bool) {
        self.qos = QoS::from_enabled(enabled);
    }

    /// Publish an already-encoded JSON document.
    pub fn send_raw<T: Transport>(&self, transport: &mut T, topic: &str, json: &str) -> Result<()> {
        if json.len() > self.max_payload_len {
            warn!(
                "Publish: payload of {} bytes exceeds buffer of {} bytes",
                json.len(),
                self.max_payload_len
            );
            return Err(Error::PayloadTooLarge {
                len: json.len(),
                max: self.max_payload_len,
            });
        }
        debug!("Publish: {} <- {}", topic, json);
        transport
            .publish(topic, json.as_bytes(), self.qos)
            .map_err(|e| {
                warn!("Publish: {} failed: {:?}", topic, e);
                Error::Transport
            })
    }

    /// Publish a JSON object.
    pub fn send_object<T: Transport>(
        &self,
        transport: &mut T,
        topic: &str,
        object: &Map<String, Value>,
    ) -> Result<()> {
        if object.len() > self.max_fields {
            warn!(
                "Publish: too many JSON fields ({} > {})",
                object.len(),
                self.max_fields
            );
            return Err(Error::TooManyFields {
                count: object.len(),
                max: self.max_fields,
            });
        }
        let json = serde_json::to_string(object).map_err(|_| Error::Serialize)?;
        self.send_raw(transport, topic, &json)
    }

    /// Publish keyed values merged into one object.
    pub fn send_values<T: Transport>(
        &self,
        transport: &mut T,
        topic: &str,
        values: &[TypedValue],
    ) -> Result<()> {
        let mut sink = Value::Object(Map::new());
        for value in values {
            if value.key().is_none() || !value.serialize_into(&mut sink) {
                warn!("Publish: unable to serialize {:?}", value);
                return Err(Error::Serialize);
            }
        }
        match sink {
            Value::Object(object) => self.send_object(transport, topic, &object),
            _ => Err(Error::Serialize),
        }
    }

    pub fn subscribe<T: Transport>(&self, transport: &mut T, topic: &str) -> Result<()> {
        transport.subscribe(topic, self.qos).map_err(|e| {
            warn!("Subscribe: {} failed: {:?}", topic, e);
            Error::Transport
        })
    }

    pub fn unsubscribe<T: Transport>(&self, transport: &mut T, topic: &str) -> Result<()> {
        transport.unsubscribe(topic).map_err(|e| {
            warn!("Unsubscribe: {} failed: {:?}", topic, e);
            Error::Transport
        })
    }
}
