//! Shared attributes: update subscriptions and one-shot requests.
//!
//! Update subscriptions are key-filtered and persistent until
//! [`Attributes::unsubscribe_updates`]. Requests are correlated by id and
//! answered at most once.

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::correlator::RequestCorrelator;
use super::publish::Outbound;
use super::registry::{CallbackRegistry, KeyFilter, Matches};
use crate::error::{Error, Result};
use crate::ports::Transport;
use crate::topics::{
    ATTRIBUTE_RESPONSE_SUBSCRIBE_TOPIC, ATTRIBUTE_TOPIC, attribute_request_topic,
};

/// Attribute key → value mapping delivered to callbacks.
pub type AttributeData = Map<String, Value>;

const SHARED_KEY: &str = "shared";
const SHARED_KEYS: &str = "sharedKeys";

/// Receives shared-attribute updates.
pub trait AttributeCallback {
    fn invoke(&mut self, data: &AttributeData);
}

impl<F: FnMut(&AttributeData)> AttributeCallback for F {
    fn invoke(&mut self, data: &AttributeData) {
        self(data);
    }
}

/// Receives the single response to a shared-attribute request.
pub type ResponseCallback = Box<dyn FnOnce(&AttributeData)>;

/// A persistent, key-filtered update subscription.
pub struct AttributeSubscription {
    filter: KeyFilter,
    handler: Box<dyn AttributeCallback>,
}

impl AttributeSubscription {
    /// Subscribe to updates touching any of `keys`; no keys means all updates.
    pub fn new<K: Into<String>>(
        keys: impl IntoIterator<Item = K>,
        handler: impl AttributeCallback + 'static,
    ) -> Self {
        Self {
            filter: KeyFilter::from_keys(keys),
            handler: Box::new(handler),
        }
    }

    /// Subscribe to every update.
    pub fn all(handler: impl AttributeCallback + 'static) -> Self {
        Self {
            filter: KeyFilter::Unfiltered,
            handler: Box::new(handler),
        }
    }

    pub fn filter(&self) -> &KeyFilter {
        &self.filter
    }
}

impl Matches<AttributeData> for AttributeSubscription {
    fn matches(&self, data: &AttributeData) -> bool {
        match self.filter.first_hit(data) {
            Some("") => {
                debug!("Attribute: callback without keys, always called");
                true
            }
            Some(key) => {
                debug!("Attribute: '{}' changed, calling callback", key);
                true
            }
            None => false,
        }
    }
}

/// Shared-attribute subsystem with `N` update slots and `N` request slots.
pub struct Attributes<const N: usize> {
    updates: CallbackRegistry<AttributeSubscription, N>,
    requests: RequestCorrelator<ResponseCallback, N>,
    response_subscribed: bool,
}

impl<const N: usize> Attributes<N> {
    pub fn new() -> Self {
        Self {
            updates: CallbackRegistry::new(),
            requests: RequestCorrelator::new(),
            response_subscribed: false,
        }
    }

    pub fn update_count(&self) -> usize {
        self.updates.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn is_request_pending(&self, request_id: u32) -> bool {
        self.requests.is_pending(request_id)
    }

    pub fn subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        out: &Outbound,
        subscriptions: Vec<AttributeSubscription>,
    ) -> Result<()> {
        self.updates
            .subscribe(subscriptions, || out.subscribe(transport, ATTRIBUTE_TOPIC))
    }

    pub fn unsubscribe_updates<T: Transport>(&mut self, transport: &mut T, out: &Outbound) -> Result<()> {
        self.updates
            .unsubscribe_all(|| out.unsubscribe(transport, ATTRIBUTE_TOPIC))
    }

    /// Ask the server for the current value of `keys`. Returns the request id.
    pub fn request<T: Transport>(
        &mut self,
        transport: &mut T,
        out: &Outbound,
        keys: &[&str],
        callback: ResponseCallback,
    ) -> Result<u32> {
        let shared_keys = keys
            .iter()
            .filter(|k| !k.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(",");
        if shared_keys.is_empty() {
            warn!("Attribute: no keys to request");
            return Err(Error::InvalidArgument("no attribute keys"));
        }
        if self.requests.len() >= N {
            warn!("Attribute: too many pending requests ({})", N);
            return Err(Error::CapacityExceeded);
        }
        if !self.response_subscribed {
            out.subscribe(transport, ATTRIBUTE_RESPONSE_SUBSCRIBE_TOPIC)?;
            self.response_subscribed = true;
        }

        let request_id = self.requests.issue(callback)?;
        let mut body = Map::new();
        body.insert(SHARED_KEYS.into(), Value::String(shared_keys));
        info!("Attribute: requesting {:?} as {}", body.get(SHARED_KEYS), request_id);

        if let Err(e) = out.send_object(transport, &attribute_request_topic(request_id), &body) {
            self.requests.take(request_id);
            return Err(e);
        }
        Ok(request_id)
    }

    pub fn unsubscribe_requests<T: Transport>(&mut self, transport: &mut T, out: &Outbound) -> Result<()> {
        self.requests.clear();
        self.response_subscribed = false;
        out.unsubscribe(transport, ATTRIBUTE_RESPONSE_SUBSCRIBE_TOPIC)
    }

    /// Deliver an update payload to every matching subscription.
    pub fn process_update(&mut self, payload: &[u8]) {
        let Some(data) = decode(payload, true) else {
            return;
        };
        info!("Attribute: received update");
        let hits = self
            .updates
            .for_each_match(&data, |sub| sub.handler.invoke(&data));
        if hits == 0 {
            debug!("Attribute: no callback interested in update");
        }
    }

    /// Deliver a request response to the request it answers.
    pub fn process_response(&mut self, request_id: u32, payload: &[u8]) {
        let Some(data) = decode(payload, false) else {
            return;
        };
        self.requests.resolve(request_id, |callback| callback(&data));
    }
}

impl<const N: usize> Default for Attributes<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an attribute payload, unwrapping one `"shared"` level.
fn decode(payload: &[u8], require_fields: bool) -> Option<AttributeData> {
    let mut data = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(data)) => data,
        Ok(_) | Err(_) => {
            warn!("Attribute: unable to deserialize payload");
            return None;
        }
    };
    if let Some(shared) = data.remove(SHARED_KEY) {
        data = match shared {
            Value::Object(shared) => shared,
            _ => {
                warn!("Attribute: 'shared' is not an object");
                return None;
            }
        };
    }
    if require_fields && data.is_empty() {
        warn!("Attribute: update without fields");
        return None;
    }
    Some(data)
}
