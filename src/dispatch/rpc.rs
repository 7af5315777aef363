//! Server-side RPC: method subscriptions and response synthesis.
//!
//! A request arrives on `v1/devices/me/rpc/request/<id>` as
//! `{"method": .., "params": ..}`. The first registered subscription whose
//! name matches (see [`MethodMatch`]) runs, and whatever it returns is
//! published on the matching `response/<id>` topic. A request nobody
//! handles is still answered, with JSON `null`.

use log::{debug, info, warn};
use serde_json::Value;

use super::publish::Outbound;
use super::registry::{CallbackRegistry, Matches, MethodMatch};
use crate::error::{Error, Result};
use crate::ports::Transport;
use crate::topics::{RPC_SUBSCRIBE_TOPIC, rpc_response_topic};
use crate::value::RpcResponse;

const METHOD_KEY: &str = "method";
const PARAMS_KEY: &str = "params";

/// Handles one RPC method.
pub trait RpcHandler {
    fn invoke(&mut self, params: &Value) -> RpcResponse;
}

impl<F: FnMut(&Value) -> RpcResponse> RpcHandler for F {
    fn invoke(&mut self, params: &Value) -> RpcResponse {
        self(params)
    }
}

/// A method name bound to its handler.
pub struct RpcSubscription {
    method: String,
    handler: Box<dyn RpcHandler>,
}

impl RpcSubscription {
    pub fn new(method: impl Into<String>, handler: impl RpcHandler + 'static) -> Self {
        Self {
            method: method.into(),
            handler: Box::new(handler),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// A received method name together with the comparison to apply.
pub struct MethodQuery<'a> {
    pub name: &'a str,
    pub mode: MethodMatch,
}

impl Matches<MethodQuery<'_>> for RpcSubscription {
    fn matches(&self, query: &MethodQuery<'_>) -> bool {
        query.mode.matches(&self.method, query.name)
    }
}

/// RPC subsystem with room for `N` method subscriptions.
pub struct Rpc<const N: usize> {
    methods: CallbackRegistry<RpcSubscription, N>,
    mode: MethodMatch,
}

impl<const N: usize> Rpc<N> {
    pub fn new(mode: MethodMatch) -> Self {
        Self {
            methods: CallbackRegistry::new(),
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn mode(&self) -> MethodMatch {
        self.mode
    }

    pub fn subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        out: &Outbound,
        subscriptions: Vec<RpcSubscription>,
    ) -> Result<()> {
        self.methods
            .subscribe(subscriptions, || out.subscribe(transport, RPC_SUBSCRIBE_TOPIC))
    }

    pub fn unsubscribe<T: Transport>(&mut self, transport: &mut T, out: &Outbound) -> Result<()> {
        self.methods
            .unsubscribe_all(|| out.unsubscribe(transport, RPC_SUBSCRIBE_TOPIC))
    }

    /// Run the handler for one request and publish its answer.
    pub fn process<T: Transport>(
        &mut self,
        transport: &mut T,
        out: &Outbound,
        topic: &str,
        payload: &[u8],
    ) -> Result<()> {
        let request = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(request)) => request,
            Ok(_) | Err(_) => {
                warn!("RPC: unable to deserialize request");
                return Err(Error::Deserialize);
            }
        };
        let Some(method) = request.get(METHOD_KEY).and_then(Value::as_str) else {
            warn!("RPC: method is missing or not a string");
            return Err(Error::Deserialize);
        };
        let params = decode_params(request.get(PARAMS_KEY));
        info!("RPC: received '{}'", method);

        let query = MethodQuery {
            name: method,
            mode: self.mode,
        };
        let response = match self.methods.first_match(&query) {
            Some(sub) => {
                debug!("RPC: calling '{}'", sub.method);
                sub.handler.invoke(&params)
            }
            None => {
                debug!("RPC: no handler for '{}'", method);
                RpcResponse::none()
            }
        };

        let mut body = Value::Null;
        if !response.serialize_into(&mut body) {
            warn!("RPC: unable to serialize response to '{}'", method);
            return Err(Error::Serialize);
        }
        let json = serde_json::to_string(&body).map_err(|_| Error::Serialize)?;
        out.send_raw(transport, &rpc_response_topic(topic), &json)
    }
}

/// `params` as handed to a handler: a string holding JSON is decoded,
/// anything else is passed through.
fn decode_params(params: Option<&Value>) -> Value {
    match params {
        None => {
            debug!("RPC: request without params");
            Value::Null
        }
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
    }
}
