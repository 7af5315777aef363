//! Integration tests for device provisioning and claiming.
//!
//! Verifies the request payloads the device publishes and which responses
//! reach the provisioning handler.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use thingslink::{AttributeData, Error};

use crate::mock_io::client;

fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl FnMut(&AttributeData) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    (seen, move |d: &AttributeData| s.borrow_mut().push(Value::Object(d.clone())))
}

#[test]
fn provision_request_carries_device_credentials() {
    let (mut c, _clock) = client();
    c.send_provision_request("sensor-01", "key-abc", "secret-xyz")
        .unwrap();
    assert_eq!(
        c.transport().last_publish(),
        Some((
            "/provision/request".to_owned(),
            json!({
                "deviceName": "sensor-01",
                "provisionDeviceKey": "key-abc",
                "provisionDeviceSecret": "secret-xyz"
            })
        ))
    );
}

#[test]
fn access_token_response_reaches_handler() {
    let (mut c, _clock) = client();
    let (seen, handler) = recorder();
    c.provision_subscribe(handler).unwrap();
    assert_eq!(c.transport().subscribed_to("/provision/response"), 1);

    let response = json!({
        "status": "SUCCESS",
        "credentialsType": "ACCESS_TOKEN",
        "credentialsValue": "token-123"
    });
    c.transport_mut()
        .push("/provision/response", &response.to_string());
    c.pump();

    assert_eq!(*seen.borrow(), [response]);
}

#[test]
fn x509_credentials_are_not_delivered() {
    let (mut c, _clock) = client();
    let (seen, handler) = recorder();
    c.provision_subscribe(handler).unwrap();
    c.on_message(
        "/provision/response",
        br#"{"status":"SUCCESS","credentialsType":"X509_CERTIFICATE","credentialsValue":{}}"#,
    );
    assert!(seen.borrow().is_empty());
}

#[test]
fn failure_status_is_delivered() {
    let (mut c, _clock) = client();
    let (seen, handler) = recorder();
    c.provision_subscribe(handler).unwrap();
    c.on_message(
        "/provision/response",
        br#"{"status":"NOT_FOUND","errorMsg":"Failed to provision device!"}"#,
    );
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn resubscribing_replaces_the_handler() {
    let (mut c, _clock) = client();
    let (first, h1) = recorder();
    let (second, h2) = recorder();
    c.provision_subscribe(h1).unwrap();
    c.provision_subscribe(h2).unwrap();
    c.on_message("/provision/response", br#"{"status":"SUCCESS"}"#);
    assert!(first.borrow().is_empty());
    assert_eq!(second.borrow().len(), 1);
}

#[test]
fn unsubscribe_drops_later_responses() {
    let (mut c, _clock) = client();
    let (seen, handler) = recorder();
    c.provision_subscribe(handler).unwrap();
    c.provision_unsubscribe().unwrap();
    c.on_message("/provision/response", br#"{"status":"SUCCESS"}"#);
    assert!(seen.borrow().is_empty());
    assert_eq!(c.transport().unsubscribed_from("/provision/response"), 1);
}

#[test]
fn claim_request_payload() {
    let (mut c, _clock) = client();
    c.send_claim_request("s3cret", 60_000).unwrap();
    assert_eq!(
        c.transport().last_publish(),
        Some((
            "v1/devices/me/claim".to_owned(),
            json!({"secretKey": "s3cret", "durationMs": 60000})
        ))
    );
}

#[test]
fn claim_without_secret_is_rejected() {
    let (mut c, _clock) = client();
    assert!(matches!(
        c.send_claim_request("", 1000),
        Err(Error::InvalidArgument(_))
    ));
    assert!(c.transport().calls.is_empty());
}
