//! Routing, RPC, shared attributes and publishing through the client.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{Value, json};
use thingslink::dispatch::{AttributeSubscription, MethodMatch, RpcSubscription};
use thingslink::ports::QoS;
use thingslink::{AttributeData, Client, ClientConfig, Error, FirmwareState, TypedValue};

use crate::mock_io::{
    FakePlatform, ManualClock, MockSink, MockTransport, WireCall, client, client_with, image,
};

// ── RPC ───────────────────────────────────────────────────────

#[test]
fn rpc_answers_on_the_response_topic() {
    let (mut c, _clock) = client();
    let seen = Rc::new(RefCell::new(Value::Null));
    let s = seen.clone();
    c.rpc_subscribe_one("setValue", move |params: &Value| {
        *s.borrow_mut() = params.clone();
        TypedValue::bare(42)
    })
    .unwrap();
    assert_eq!(c.transport().subscribed_to("v1/devices/me/rpc/request/+"), 1);

    c.transport_mut().push(
        "v1/devices/me/rpc/request/7",
        r#"{"method":"setValue","params":{"pin":4,"on":true}}"#,
    );
    assert_eq!(c.pump(), 1);

    assert_eq!(*seen.borrow(), json!({"pin": 4, "on": true}));
    assert_eq!(
        c.transport().last_publish(),
        Some(("v1/devices/me/rpc/response/7".to_owned(), json!(42)))
    );
}

#[test]
fn rpc_prefix_match_is_the_default() {
    let (mut c, _clock) = client();
    let calls = Rc::new(Cell::new(0));
    let n = calls.clone();
    c.rpc_subscribe_one("set", move |_: &Value| {
        n.set(n.get() + 1);
        TypedValue::bare(true)
    })
    .unwrap();

    c.on_message("v1/devices/me/rpc/request/1", br#"{"method":"setValue","params":null}"#);
    assert_eq!(calls.get(), 1);
}

#[test]
fn rpc_exact_match_does_not_answer_longer_names() {
    let config = ClientConfig {
        rpc_match: MethodMatch::Exact,
        ..ClientConfig::default()
    };
    let (mut c, _clock) = client_with(config);
    let calls = Rc::new(Cell::new(0));
    let n = calls.clone();
    c.rpc_subscribe_one("set", move |_: &Value| {
        n.set(n.get() + 1);
        TypedValue::bare(true)
    })
    .unwrap();

    c.on_message("v1/devices/me/rpc/request/2", br#"{"method":"setValue"}"#);
    assert_eq!(calls.get(), 0);
    assert_eq!(
        c.transport().published_on("v1/devices/me/rpc/response/2"),
        ["null"]
    );
}

#[test]
fn first_registered_handler_wins() {
    let (mut c, _clock) = client();
    c.rpc_subscribe(vec![
        RpcSubscription::new("get", |_: &Value| TypedValue::bare("first")),
        RpcSubscription::new("get", |_: &Value| TypedValue::bare("second")),
    ])
    .unwrap();
    c.on_message("v1/devices/me/rpc/request/3", br#"{"method":"get"}"#);
    assert_eq!(
        c.transport().last_publish(),
        Some(("v1/devices/me/rpc/response/3".to_owned(), json!("first")))
    );
}

#[test]
fn rpc_string_params_holding_json_are_decoded() {
    let (mut c, _clock) = client();
    let seen = Rc::new(RefCell::new(Value::Null));
    let s = seen.clone();
    c.rpc_subscribe_one("cfg", move |p: &Value| {
        *s.borrow_mut() = p.clone();
        TypedValue::none()
    })
    .unwrap();
    c.on_message(
        "v1/devices/me/rpc/request/4",
        br#"{"method":"cfg","params":"{\"rate\":10}"}"#,
    );
    assert_eq!(*seen.borrow(), json!({"rate": 10}));
}

#[test]
fn malformed_rpc_is_dropped_without_answer() {
    let (mut c, _clock) = client();
    c.rpc_subscribe_one("x", |_: &Value| TypedValue::none()).unwrap();
    c.on_message("v1/devices/me/rpc/request/5", b"not json");
    c.on_message("v1/devices/me/rpc/request/6", br#"{"params":1}"#);
    assert!(c.transport().published_topics().is_empty());
}

#[test]
fn rpc_registry_rejects_overflow_atomically() {
    let mut c: Client<MockTransport, MockSink, ManualClock, 2> = Client::new(
        MockTransport::new(),
        MockSink::default(),
        ManualClock::default(),
        ClientConfig::default(),
    );
    c.rpc_subscribe_one("a", |_: &Value| TypedValue::none()).unwrap();
    let res = c.rpc_subscribe(vec![
        RpcSubscription::new("b", |_: &Value| TypedValue::none()),
        RpcSubscription::new("c", |_: &Value| TypedValue::none()),
    ]);
    assert_eq!(res, Err(Error::CapacityExceeded));
    assert_eq!(c.rpc_subscriptions(), 1);
    assert_eq!(c.transport().subscribed_to("v1/devices/me/rpc/request/+"), 1);
}

#[test]
fn rpc_subscribe_failure_leaves_registry_empty() {
    let (mut c, _clock) = client();
    c.transport_mut().fail_subscribe = true;
    assert_eq!(
        c.rpc_subscribe_one("a", |_: &Value| TypedValue::none()),
        Err(Error::Transport)
    );
    assert_eq!(c.rpc_subscriptions(), 0);
}

#[test]
fn rpc_unsubscribe_clears_handlers() {
    let (mut c, _clock) = client();
    c.rpc_subscribe_one("a", |_: &Value| TypedValue::bare(1)).unwrap();
    c.rpc_unsubscribe().unwrap();
    assert_eq!(c.rpc_subscriptions(), 0);
    c.on_message("v1/devices/me/rpc/request/9", br#"{"method":"a"}"#);
    assert_eq!(
        c.transport().published_on("v1/devices/me/rpc/response/9"),
        ["null"]
    );
}

// ── Shared attribute updates ──────────────────────────────────

#[test]
fn attribute_update_reaches_filtered_and_wildcard_callbacks() {
    let (mut c, _clock) = client();
    let filtered = Rc::new(RefCell::new(Vec::new()));
    let wildcard = Rc::new(Cell::new(0));
    let f = filtered.clone();
    let w = wildcard.clone();
    c.attributes_subscribe(vec![
        AttributeSubscription::new(["interval", "mode"], move |d: &AttributeData| {
            f.borrow_mut().push(Value::Object(d.clone()));
        }),
        AttributeSubscription::all(move |_: &AttributeData| w.set(w.get() + 1)),
    ])
    .unwrap();

    c.on_message("v1/devices/me/attributes", br#"{"mode":"eco","other":1}"#);
    c.on_message("v1/devices/me/attributes", br#"{"shared":{"interval":5}}"#);
    c.on_message("v1/devices/me/attributes", br#"{"unrelated":true}"#);

    assert_eq!(
        *filtered.borrow(),
        [json!({"mode": "eco", "other": 1}), json!({"interval": 5})]
    );
    assert_eq!(wildcard.get(), 3);
}

#[test]
fn empty_or_invalid_update_is_dropped() {
    let (mut c, _clock) = client();
    let calls = Rc::new(Cell::new(0));
    let n = calls.clone();
    c.attributes_subscribe_one(Vec::<String>::new(), move |_: &AttributeData| n.set(n.get() + 1))
        .unwrap();
    c.on_message("v1/devices/me/attributes", b"{}");
    c.on_message("v1/devices/me/attributes", b"[1]");
    c.on_message("v1/devices/me/attributes", b"{broken");
    assert_eq!(calls.get(), 0);
}

#[test]
fn attributes_unsubscribe_clears_registry() {
    let (mut c, _clock) = client();
    c.attributes_subscribe_one(["a"], |_: &AttributeData| {}).unwrap();
    c.attributes_unsubscribe().unwrap();
    assert_eq!(c.attribute_subscriptions(), 0);
    assert_eq!(c.transport().unsubscribed_from("v1/devices/me/attributes"), 1);
}

// ── Shared attribute requests ─────────────────────────────────

#[test]
fn attribute_request_is_answered_once() {
    let (mut c, _clock) = client();
    let answers = Rc::new(RefCell::new(Vec::new()));
    let a = answers.clone();
    let id = c
        .request_shared_attributes(&["interval", "", "mode"], move |d: &AttributeData| {
            a.borrow_mut().push(Value::Object(d.clone()));
        })
        .unwrap();
    assert_eq!(id, 1);
    assert_eq!(
        c.transport().last_publish(),
        Some((
            "v1/devices/me/attributes/request/1".to_owned(),
            json!({"sharedKeys": "interval,mode"})
        ))
    );
    assert_eq!(c.pending_attribute_requests(), 1);

    let response = br#"{"shared":{"interval":30}}"#;
    c.on_message("v1/devices/me/attributes/response/1", response);
    c.on_message("v1/devices/me/attributes/response/1", response);

    assert_eq!(*answers.borrow(), [json!({"interval": 30})]);
    assert_eq!(c.pending_attribute_requests(), 0);
}

#[test]
fn request_ids_increase_and_response_topic_is_subscribed_once() {
    let (mut c, _clock) = client();
    let a = c.request_shared_attributes(&["a"], |_: &AttributeData| {}).unwrap();
    let b = c.request_shared_attributes(&["b"], |_: &AttributeData| {}).unwrap();
    assert_eq!((a, b), (1, 2));
    assert_eq!(
        c.transport()
            .subscribed_to("v1/devices/me/attributes/response/+"),
        1
    );
}

#[test]
fn empty_response_still_retires_the_request() {
    let (mut c, _clock) = client();
    let got = Rc::new(Cell::new(None));
    let g = got.clone();
    c.request_shared_attributes(&["missing"], move |d: &AttributeData| g.set(Some(d.len())))
        .unwrap();
    c.on_message("v1/devices/me/attributes/response/1", b"{}");
    assert_eq!(got.get(), Some(0));
    assert_eq!(c.pending_attribute_requests(), 0);
}

#[test]
fn request_without_keys_is_rejected() {
    let (mut c, _clock) = client();
    assert!(matches!(
        c.request_shared_attributes(&["", ""], |_: &AttributeData| {}),
        Err(Error::InvalidArgument(_))
    ));
    assert!(c.transport().calls.is_empty());
}

#[test]
fn stale_response_is_ignored() {
    let (mut c, _clock) = client();
    let calls = Rc::new(Cell::new(0));
    let n = calls.clone();
    c.request_shared_attributes(&["a"], move |_: &AttributeData| n.set(n.get() + 1))
        .unwrap();
    c.on_message("v1/devices/me/attributes/response/99", br#"{"a":1}"#);
    c.on_message("v1/devices/me/attributes/response/x", br#"{"a":1}"#);
    assert_eq!(calls.get(), 0);
    assert_eq!(c.pending_attribute_requests(), 1);
}

#[test]
fn failed_request_publish_releases_the_slot() {
    let (mut c, _clock) = client();
    c.transport_mut().fail_publish = true;
    assert_eq!(
        c.request_shared_attributes(&["a"], |_: &AttributeData| {}),
        Err(Error::Transport)
    );
    assert_eq!(c.pending_attribute_requests(), 0);
}

#[test]
fn request_table_is_bounded() {
    let mut c: Client<MockTransport, MockSink, ManualClock, 2> = Client::new(
        MockTransport::new(),
        MockSink::default(),
        ManualClock::default(),
        ClientConfig::default(),
    );
    c.request_shared_attributes(&["a"], |_: &AttributeData| {}).unwrap();
    c.request_shared_attributes(&["b"], |_: &AttributeData| {}).unwrap();
    assert_eq!(
        c.request_shared_attributes(&["c"], |_: &AttributeData| {}),
        Err(Error::CapacityExceeded)
    );
}

// ── Publishing ────────────────────────────────────────────────

#[test]
fn telemetry_values_merge_into_one_object() {
    let (mut c, _clock) = client();
    c.send_telemetry(&[
        TypedValue::new("temperature", 21.5),
        TypedValue::new("door", false),
        TypedValue::new("label", "lab"),
    ])
    .unwrap();
    assert_eq!(
        c.transport().last_publish(),
        Some((
            "v1/devices/me/telemetry".to_owned(),
            json!({"temperature": 21.5, "door": false, "label": "lab"})
        ))
    );
}

#[test]
fn attribute_value_goes_to_attribute_topic() {
    let (mut c, _clock) = client();
    c.send_attribute_value("firmware", "1.0").unwrap();
    c.send_attribute_raw(r#"{"serial":"A1"}"#).unwrap();
    assert_eq!(
        c.transport().published_on("v1/devices/me/attributes"),
        [r#"{"firmware":"1.0"}"#, r#"{"serial":"A1"}"#]
    );
}

#[test]
fn oversized_payload_is_rejected() {
    let config = ClientConfig {
        max_payload_len: 16,
        ..ClientConfig::default()
    };
    let (mut c, _clock) = client_with(config);
    let res = c.send_telemetry_value("a_rather_long_key", 123_456);
    assert!(matches!(res, Err(Error::PayloadTooLarge { max: 16, .. })));
    assert!(c.transport().calls.is_empty());
}

#[test]
fn too_many_fields_are_rejected() {
    let config = ClientConfig {
        max_fields: 2,
        ..ClientConfig::default()
    };
    let (mut c, _clock) = client_with(config);
    let mut object = serde_json::Map::new();
    for key in ["a", "b", "c"] {
        object.insert(key.into(), json!(1));
    }
    assert_eq!(
        c.send_telemetry_json(&object),
        Err(Error::TooManyFields { count: 3, max: 2 })
    );
}

#[test]
fn keyless_or_non_finite_telemetry_fails_to_serialize() {
    let (mut c, _clock) = client();
    assert_eq!(c.send_telemetry(&[TypedValue::bare(1)]), Err(Error::Serialize));
    assert_eq!(
        c.send_telemetry_value("nan", f64::NAN),
        Err(Error::Serialize)
    );
}

#[test]
fn publish_failure_is_reported() {
    let (mut c, _clock) = client();
    c.transport_mut().fail_publish = true;
    assert_eq!(c.send_telemetry_value("t", 1), Err(Error::Transport));
}

#[test]
fn qos_toggle_applies_to_later_calls() {
    let (mut c, _clock) = client();
    c.set_qos(true);
    assert_eq!(c.qos(), QoS::AtLeastOnce);
    c.send_telemetry_value("t", 1).unwrap();
    c.rpc_subscribe_one("m", |_: &Value| TypedValue::none()).unwrap();
    assert!(matches!(
        c.transport().calls[..],
        [
            WireCall::Publish { qos: QoS::AtLeastOnce, .. },
            WireCall::Subscribe { qos: QoS::AtLeastOnce, .. }
        ]
    ));
}

// ── Routing & connect hygiene ─────────────────────────────────

#[test]
fn unknown_topics_are_ignored() {
    let (mut c, _clock) = client();
    c.on_message("v1/devices/me/telemetry", b"{}");
    c.on_message("some/other/topic", b"payload");
    c.on_message("v2/fw/response/0/chunk/0", b"orphan chunk");
    assert!(c.transport().calls.is_empty());
}

#[test]
fn on_connected_resets_every_subscription() {
    let (mut c, _clock) = client();
    c.rpc_subscribe_one("a", |_: &Value| TypedValue::none()).unwrap();
    c.attributes_subscribe_one(["k"], |_: &AttributeData| {}).unwrap();
    c.request_shared_attributes(&["k"], |_: &AttributeData| {}).unwrap();
    c.provision_subscribe(|_: &AttributeData| {}).unwrap();

    c.on_connected();

    assert_eq!(c.rpc_subscriptions(), 0);
    assert_eq!(c.attribute_subscriptions(), 0);
    assert_eq!(c.pending_attribute_requests(), 0);
    let t = c.transport();
    for topic in [
        "v1/devices/me/rpc/request/+",
        "v1/devices/me/attributes",
        "v1/devices/me/attributes/response/+",
        "/provision/response",
        "v2/fw/response/#",
    ] {
        assert_eq!(t.unsubscribed_from(topic), 1, "{topic}");
    }
}

#[test]
fn on_connected_keeps_an_active_firmware_session_listening() {
    let (mut c, _clock) = client();
    c.start_firmware_update("app", "1.0", |_| {}).unwrap();
    c.on_connected();
    assert_eq!(c.attribute_subscriptions(), 1);
    assert_eq!(c.transport().subscribed_to("v1/devices/me/attributes"), 2);
}

#[test]
fn on_connected_resumes_an_interrupted_download() {
    let (mut c, _clock) = client();
    let img = image(10_000);
    let mut platform = FakePlatform::serving("app", "1.1", img.clone());
    platform.silent = true;
    c.transport_mut().platform = Some(platform);
    c.start_firmware_update("app", "1.0", |_| {}).unwrap();
    c.pump();
    assert_eq!(c.firmware_state(), FirmwareState::Downloading);

    if let Some(p) = c.transport_mut().platform.as_mut() {
        p.silent = false;
    }
    c.on_connected();

    let t = c.transport();
    assert_eq!(t.unsubscribed_from("v2/fw/response/#"), 1);
    assert_eq!(t.subscribed_to("v2/fw/response/#"), 2);
    let unsubscribed = t
        .calls
        .iter()
        .position(|w| matches!(w, WireCall::Unsubscribe { topic } if topic == "v2/fw/response/#"));
    let resubscribed = t
        .calls
        .iter()
        .rposition(|w| matches!(w, WireCall::Subscribe { topic, .. } if topic == "v2/fw/response/#"));
    assert!(resubscribed > unsubscribed);
    assert_eq!(t.chunk_requests(), [0, 0]);

    c.pump();
    assert_eq!(c.firmware_outcome(), Some(FirmwareState::Success));
    assert_eq!(c.sink().image, img);
}

#[test]
fn on_connected_asks_again_for_firmware_metadata() {
    let (mut c, _clock) = client();
    c.transport_mut().platform = Some(FakePlatform::serving("app", "1.1", image(100)));
    c.start_firmware_update("app", "1.0", |_| {}).unwrap();
    assert_eq!(c.firmware_state(), FirmwareState::Ready);

    c.on_connected();

    let requests = c
        .transport()
        .published_topics()
        .iter()
        .filter(|t| t.starts_with("v1/devices/me/attributes/request/"))
        .count();
    assert_eq!(requests, 2);
    assert_eq!(c.pending_attribute_requests(), 1);
    assert_eq!(
        c.transport().subscribed_to("v1/devices/me/attributes/response/+"),
        2
    );

    // The answer to the first request is stale and dropped; the second
    // one starts the download.
    c.pump();
    assert_eq!(c.firmware_outcome(), Some(FirmwareState::Success));
}
