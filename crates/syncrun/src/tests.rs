use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Value;
use serde_json::json;
use syncrpc::MethodHandle;
use syncrpc::MethodKey;
use syncrpc::MethodResolver;
use syncrpc::ParamType;
use syncrpc::RpcInterface;
use syncrpc::RpcValue;

use crate::*;

type CallLog = Arc<Mutex<Vec<(String, Vec<RpcValue>)>>>;

/// A connector whose only server-bound interface records every call it receives.
struct Button {
    rpc: RpcRegistry,
    enabled: AtomicBool,
}

impl Connector for Button {
    fn rpc(&self) -> &RpcRegistry {
        &self.rpc
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

fn button_rpc() -> Arc<RpcInterface> {
    RpcInterface::server("ui.ButtonRpc")
        .method("click", [ParamType::Json])
        .method("fail", [])
        .build()
        .unwrap()
}

fn data_request_rpc() -> Arc<RpcInterface> {
    RpcInterface::server("ui.DataRequestRpc")
        .method("requestRows", [ParamType::Int, ParamType::Int])
        .build()
        .unwrap()
}

fn client_rpc() -> Arc<RpcInterface> {
    RpcInterface::client("ui.ButtonClientRpc")
        .method("focus", [])
        .method("setCaption", [ParamType::String])
        .method("setState", [ParamType::Json])
        .method("setOpacity", [ParamType::Float])
        .build()
        .unwrap()
}

fn button(log: &CallLog) -> Arc<Button> {
    let recorder = |log: &CallLog| {
        let log = Arc::clone(log);
        move |method: &MethodHandle, params: Vec<RpcValue>| -> anyhow::Result<()> {
            if method.name() == "fail" {
                anyhow::bail!("button is broken");
            }
            log.lock().unwrap().push((method.name().to_string(), params));
            Ok(())
        }
    };

    let mut rpc = RpcRegistry::new();
    rpc.register(button_rpc(), recorder(log)).unwrap();
    rpc.register(data_request_rpc(), recorder(log)).unwrap();
    Arc::new(Button {
        rpc,
        enabled: AtomicBool::new(true),
    })
}

fn session() -> Session {
    Session::builder()
        .resolver(Arc::new(MethodResolver::new()))
        .build()
}

fn as_ref(button: &Arc<Button>) -> ConnectorRef {
    Arc::clone(button) as ConnectorRef
}

// --- Keys ---

#[test]
fn test_connectors_are_keyed_by_identity() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    let ka = session.attach(&a);
    let kb = session.attach(&b);
    assert_eq!(ka, "1");
    assert_eq!(kb, "2");
    assert_eq!(session.attach(&Arc::clone(&a)), ka);
    assert!(Arc::ptr_eq(session.connector(&kb).unwrap(), &b));
}

#[test]
fn test_register_rejects_client_bound_interface() {
    let mut rpc = RpcRegistry::new();
    let result = rpc.register(client_rpc(), |_: &MethodHandle, _: Vec<RpcValue>| -> anyhow::Result<()> { Ok(()) });
    assert!(matches!(result, Err(dispatch::Error::NotServerBound(_))));
    assert!(!rpc.contains("ui.ButtonClientRpc"));

    rpc.register(button_rpc(), |_: &MethodHandle, _: Vec<RpcValue>| -> anyhow::Result<()> { Ok(()) })
        .unwrap();
    let registered = rpc.interface("ui.ButtonRpc").unwrap();
    assert_eq!(registered.direction(), syncrpc::Direction::ServerBound);
    assert_eq!(registered.methods().len(), 2);
}

// --- Client-bound calls ---

#[test]
fn test_flush_preserves_call_order_across_connectors() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));
    let rpc = client_rpc();

    session.call_client(&a, &rpc, "setCaption", vec!["Save".into()]).unwrap();
    session.call_client(&b, &rpc, "focus", vec![]).unwrap();
    session.call_client(&a, &rpc, "setState", vec![RpcValue::Json(json!({"busy": true}))]).unwrap();

    assert_eq!(session.pending(&a).len(), 2);
    assert_eq!(session.flush(), json!([
        ["1", "ui.ButtonClientRpc", "setCaption", ["Save"]],
        ["2", "ui.ButtonClientRpc", "focus", []],
        ["1", "ui.ButtonClientRpc", "setState", [{"busy": true}]],
    ]));
    assert_eq!(session.flush(), json!([]));
}

#[test]
fn test_call_client_checks_direction_and_signature() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));

    let err = session.call_client(&a, &button_rpc(), "click", vec![json!({}).into()]).unwrap_err();
    assert!(matches!(err, session::Error::WrongDirection(_)));

    let err = session.call_client(&a, &client_rpc(), "focus", vec![1.into()]).unwrap_err();
    assert!(matches!(err, session::Error::Resolve(_)));

    let err = session.call_client(&a, &client_rpc(), "setCaption", vec![true.into()]).unwrap_err();
    assert!(matches!(err, session::Error::Queue(queue::Error::ParamMismatch { .. })));

    assert_eq!(session.pending_count(), 0);
    assert_eq!(session.call_client(&a, &client_rpc(), "focus", vec![]).unwrap(), 1);
}

#[test]
fn test_detach_discards_pending_calls() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    session.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    session.call_client(&b, &client_rpc(), "focus", vec![]).unwrap();
    session.detach(&a);

    assert_eq!(session.key_of(&a), None);
    assert!(session.pending(&a).is_empty());
    assert_eq!(session.flush(), json!([["2", "ui.ButtonClientRpc", "focus", []]]));
}

#[test]
fn test_prune_drops_unreachable_connectors() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    session.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    session.call_client(&b, &client_rpc(), "focus", vec![]).unwrap();
    session.encode_state(&b, json!({"caption": "x"}));

    assert_eq!(session.prune(vec![Arc::clone(&a)]), 1);
    assert_eq!(session.connector_count(), 1);
    assert_eq!(session.pending_count(), 1);

    let b_again = session.encode_state(&b, json!({"caption": "x"}));
    assert_eq!(b_again.diff(), Some(&json!({"caption": "x"})));
}

#[test]
fn test_shared_sequencer_orders_across_sessions() {
    let log = CallLog::default();
    let shared = Sequencer::new();
    let mut first = Session::builder().sequencer(shared.clone()).build();
    let mut second = Session::builder().sequencer(shared.clone()).build();
    let a = as_ref(&button(&log));

    assert_eq!(first.call_client(&a, &client_rpc(), "focus", vec![]).unwrap(), 1);
    assert_eq!(second.call_client(&a, &client_rpc(), "focus", vec![]).unwrap(), 2);
    assert_eq!(first.call_client(&a, &client_rpc(), "focus", vec![]).unwrap(), 3);
    assert!(first.config().sequencer().shares_counter(second.config().sequencer()));
}

// --- State diffs ---

#[test]
fn test_encode_state_sends_changes_only() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));

    let first = session.encode_state(&a, json!({"caption": "Save", "enabled": true}));
    assert_eq!(first.diff_or_value(), &json!({"caption": "Save", "enabled": true}));

    let second = session.encode_state(&a, json!({"caption": "Saving", "enabled": true}));
    assert_eq!(second.diff_or_value(), &json!({"caption": "Saving"}));
    assert_eq!(second.encoded_value(), Some(&json!({"caption": "Saving", "enabled": true})));
}

// --- Inbound dispatch ---

#[test]
fn test_handle_rpc_delivers_decoded_params() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let key = session.attach(&a);

    let report = session
        .handle_rpc(&json!([
            [key, "ui.ButtonRpc", "click", [{"x": 4}]],
            [key, "ui.DataRequestRpc", "requestRows", [0, 50]],
        ]))
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.delivered, 2);
    assert_eq!(*log.lock().unwrap(), vec![
        ("click".to_string(), vec![RpcValue::Json(json!({"x": 4}))]),
        ("requestRows".to_string(), vec![RpcValue::Int(0), RpcValue::Int(50)]),
    ]);
}

#[test]
fn test_handle_rpc_skips_what_it_cannot_route() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let key = session.attach(&a);

    let report = session
        .handle_rpc(&json!([
            ["99", "ui.ButtonRpc", "click", [null]],
            [key, "ui.TextFieldRpc", "change", ["not decoded"]],
            [key, "ui.ButtonRpc", "fail", []],
            [key, "ui.ButtonRpc", "click", [1]],
        ]))
        .unwrap();

    assert_eq!(report.unknown_connector, 1);
    assert_eq!(report.unregistered, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].method, MethodKey::new("ui.ButtonRpc", "fail", 0));
    assert_eq!(report.failures[0].error.to_string(), "button is broken");
    assert_eq!(report.delivered, 1);
}

#[test]
fn test_disabled_connector_only_accepts_allowed_interfaces() {
    let log = CallLog::default();
    let mut session = Session::builder()
        .resolver(Arc::new(MethodResolver::new()))
        .allow_when_disabled("ui.DataRequestRpc")
        .build();
    let disabled = button(&log);
    disabled.enabled.store(false, Ordering::Relaxed);
    let key = session.attach(&as_ref(&disabled));

    let report = session
        .handle_rpc(&json!([
            [key, "ui.ButtonRpc", "click", [{}]],
            [key, "ui.DataRequestRpc", "requestRows", [10, 20]],
        ]))
        .unwrap();

    assert_eq!(report.disabled, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(log.lock().unwrap()[0].0, "requestRows");
}

#[test]
fn test_unresolvable_call_aborts_whole_batch() {
    let log = CallLog::default();
    let mut session = session();
    let a = as_ref(&button(&log));
    let key = session.attach(&a);

    let err = session
        .handle_rpc(&json!([
            [key, "ui.ButtonRpc", "click", [{}]],
            [key, "ui.ButtonRpc", "click", [1, 2]],
        ]))
        .unwrap_err();

    assert!(matches!(err, session::Error::Dispatch(dispatch::Error::Resolve(_))));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_bad_parameter_aborts_whole_batch() {
    let log = CallLog::default();
    let mut session = session();
    let key = session.attach(&as_ref(&button(&log)));

    let err = session
        .handle_rpc(&json!([[key, "ui.DataRequestRpc", "requestRows", [0, "many"]]]))
        .unwrap_err();

    assert!(matches!(err, session::Error::Dispatch(dispatch::Error::Decode { index: 1, .. })));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_strict_mode_rejects_unknown_connector() {
    let mut session = Session::builder()
        .resolver(Arc::new(MethodResolver::new()))
        .strict_unknown_connectors(true)
        .build();

    let err = session.handle_rpc(&json!([["5", "ui.ButtonRpc", "click", [{}]]])).unwrap_err();
    assert!(matches!(
        err,
        session::Error::Dispatch(dispatch::Error::UnknownConnector { ref target, .. }) if target == "5"
    ));
}

#[test]
fn test_malformed_batch_is_a_wire_error() {
    let mut session = session();
    let err = session.handle_rpc(&json!({"not": "a batch"})).unwrap_err();
    assert!(matches!(err, session::Error::Dispatch(dispatch::Error::Wire(_))));
}

// --- Persistence ---

#[test]
fn test_restore_continues_the_sequence() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    let mut original = session();
    original.attach(&a);
    original.call_client(&b, &client_rpc(), "setState", vec![RpcValue::Json(json!({"rows": [1, 2]}))]).unwrap();
    original.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    let bytes = original.snapshot_queue().unwrap();

    let mut restored = session();
    let live = [("1", Arc::clone(&a)), ("2", Arc::clone(&b))];
    restored
        .restore_queue(&bytes, |key| live.iter().find(|(k, _)| *k == key).map(|(_, c)| Arc::clone(c)))
        .unwrap();

    assert_eq!(restored.key_of(&b), Some("2"));
    assert_eq!(restored.call_client(&a, &client_rpc(), "focus", vec![]).unwrap(), 3);
    assert_eq!(restored.flush(), json!([
        ["2", "ui.ButtonClientRpc", "setState", [{"rows": [1, 2]}]],
        ["1", "ui.ButtonClientRpc", "focus", []],
        ["1", "ui.ButtonClientRpc", "focus", []],
    ]));

    let fresh = as_ref(&button(&log));
    assert_eq!(restored.attach(&fresh), "3");
}

#[test]
fn test_restore_fails_for_missing_connector() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));

    let mut original = session();
    original.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    let bytes = original.snapshot_queue().unwrap();

    let mut restored = session();
    let err = restored.restore_queue(&bytes, |_| None).unwrap_err();
    assert!(matches!(err, session::Error::MissingConnector(ref key) if key == "1"));
    assert_eq!(restored.pending_count(), 0);
    assert_eq!(restored.connector_count(), 0);
}

#[test]
fn test_restore_rejects_garbage() {
    let mut restored = session();
    let err = restored.restore_queue(b"{\"connectors\": 3}", |_| None::<ConnectorRef>).unwrap_err();
    assert!(matches!(err, session::Error::Persist(persist::Error::Format(_))));

    let snapshot: Value = serde_json::from_slice(&session().snapshot_queue().unwrap()).unwrap();
    assert_eq!(snapshot, json!({"connectors": [], "queue": {"next_seq": 1, "invocations": []}}));
}

#[test]
fn test_restore_rejects_connector_mapped_under_another_key() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    let mut original = session();
    original.attach(&b);
    original.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    let bytes = original.snapshot_queue().unwrap();

    let mut restored = session();
    assert_eq!(restored.attach(&a), "1");
    let err = restored.restore_queue(&bytes, |_| Some(Arc::clone(&a))).unwrap_err();
    assert!(matches!(err, session::Error::ConnectorConflict(ref key) if key == "2"));
    assert_eq!(restored.connector_count(), 1);
}

#[test]
fn test_non_finite_floats_survive_restore() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));

    let mut original = session();
    for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        original.call_client(&a, &client_rpc(), "setOpacity", vec![RpcValue::Float(x)]).unwrap();
    }
    let bytes = original.snapshot_queue().unwrap();

    let mut restored = session();
    restored.restore_queue(&bytes, |_| Some(Arc::clone(&a))).unwrap();

    let floats: Vec<f64> = restored
        .pending(&a)
        .iter()
        .map(|record| match record.params() {
            [RpcValue::Float(x)] => *x,
            other => panic!("expected one float, found {:?}", other),
        })
        .collect();
    assert_eq!(floats.len(), 3);
    assert!(floats[0].is_nan());
    assert_eq!(&floats[1..], &[f64::INFINITY, f64::NEG_INFINITY]);
}

#[test]
fn test_restore_refuses_to_drop_queued_calls() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));
    let bytes = session().snapshot_queue().unwrap();

    let mut live = session();
    live.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();

    let err = live.restore_queue(&bytes, |_| None).unwrap_err();
    assert!(matches!(err, session::Error::PendingCalls(1)));
    assert_eq!(live.pending_count(), 1);
    assert_eq!(live.flush(), json!([["1", "ui.ButtonClientRpc", "focus", []]]));
}

#[test]
fn test_restore_rejects_key_held_by_another_connector() {
    let log = CallLog::default();
    let a = as_ref(&button(&log));
    let b = as_ref(&button(&log));

    let mut original = session();
    original.call_client(&a, &client_rpc(), "focus", vec![]).unwrap();
    let bytes = original.snapshot_queue().unwrap();

    let mut restored = session();
    assert_eq!(restored.attach(&b), "1");
    let err = restored.restore_queue(&bytes, |_| Some(Arc::clone(&a))).unwrap_err();
    assert!(matches!(err, session::Error::ConnectorConflict(ref key) if key == "1"));
    assert!(Arc::ptr_eq(restored.connector("1").unwrap(), &b));
    assert_eq!(restored.pending_count(), 0);
}
