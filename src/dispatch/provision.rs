//! Device provisioning and claiming.
//!
//! Provisioning is the handshake by which an unregistered device trades a
//! provisioning key/secret for credentials. Only one response handler is
//! kept; subscribing again replaces it.

use log::{info, warn};
use serde_json::{Map, Value};

use super::attribute::AttributeData;
use super::publish::Outbound;
use crate::error::{Error, Result};
use crate::ports::Transport;
use crate::topics::{CLAIM_TOPIC, PROVISION_REQUEST_TOPIC, PROVISION_RESPONSE_TOPIC};

const STATUS_KEY: &str = "status";
const STATUS_SUCCESS: &str = "SUCCESS";
const CREDENTIALS_TYPE_KEY: &str = "credentialsType";
const CREDENTIALS_X509: &str = "X509_CERTIFICATE";

/// Receives the provisioning response.
pub trait ProvisionCallback {
    fn invoke(&mut self, data: &AttributeData);
}

impl<F: FnMut(&AttributeData)> ProvisionCallback for F {
    fn invoke(&mut self, data: &AttributeData) {
        self(data);
    }
}

/// Holder of the provisioning response handler.
#[derive(Default)]
pub struct Provisioning {
    handler: Option<Box<dyn ProvisionCallback>>,
}

impl Provisioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handler.is_some()
    }

    pub fn subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        out: &Outbound,
        handler: impl ProvisionCallback + 'static,
    ) -> Result<()> {
        out.subscribe(transport, PROVISION_RESPONSE_TOPIC)?;
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    pub fn unsubscribe<T: Transport>(&mut self, transport: &mut T, out: &Outbound) -> Result<()> {
        self.handler = None;
        out.unsubscribe(transport, PROVISION_RESPONSE_TOPIC)
    }

    pub fn send_request<T: Transport>(
        &self,
        transport: &mut T,
        out: &Outbound,
        device_name: &str,
        provision_key: &str,
        provision_secret: &str,
    ) -> Result<()> {
        let mut body = Map::new();
        body.insert("deviceName".into(), device_name.into());
        body.insert("provisionDeviceKey".into(), provision_key.into());
        body.insert("provisionDeviceSecret".into(), provision_secret.into());
        info!("Provision: requesting credentials for '{}'", device_name);
        out.send_object(transport, PROVISION_REQUEST_TOPIC, &body)
    }

    pub fn process(&mut self, payload: &[u8]) {
        let data = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(data)) => data,
            Ok(_) | Err(_) => {
                warn!("Provision: unable to deserialize response");
                return;
            }
        };
        let Some(handler) = self.handler.as_mut() else {
            warn!("Provision: response without a subscribed handler");
            return;
        };
        let status = data.get(STATUS_KEY).and_then(Value::as_str);
        let credentials = data.get(CREDENTIALS_TYPE_KEY).and_then(Value::as_str);
        if status == Some(STATUS_SUCCESS) && credentials == Some(CREDENTIALS_X509) {
            warn!("Provision: X.509 certificate credentials are not supported");
            return;
        }
        info!("Provision: response received ({:?})", status);
        handler.invoke(&data);
    }
}

/// Publish a claim request so a customer can take ownership of the device
/// with `secret_key` during the next `duration_ms` milliseconds.
pub fn send_claim_request<T: Transport>(
    transport: &mut T,
    out: &Outbound,
    secret_key: &str,
    duration_ms: u32,
) -> Result<()> {
    if secret_key.is_empty() {
        return Err(Error::InvalidArgument("empty claim secret"));
    }
    let mut body = Map::new();
    body.insert("secretKey".into(), secret_key.into());
    body.insert("durationMs".into(), duration_ms.into());
    info!("Claim: requesting claim for {} ms", duration_ms);
    out.send_object(transport, CLAIM_TOPIC, &body)
}
