//! Integration tests for callback interfaces
//!
//! Host objects are lowered into the host-side dispatch tables, the
//! trampolines are registered through the init exports, and the device
//! calls back into them exactly as it would call a Go or Swift object.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use telio_bridge::ffi::codec::{lower_into_buffer, lower_string, Json};
use telio_bridge::ffi::RustCallStatus;
use telio_bridge::host::{
    register_trampolines, EVENT_CALLBACKS, LOGGER_CALLBACKS, PROTECT_CALLBACKS,
};
use telio_bridge::telio::exports::{
    uniffi_telio_fn_constructor_telio_new, uniffi_telio_fn_free_telio,
    uniffi_telio_fn_func_set_global_logger, uniffi_telio_fn_method_telio_set_meshnet,
    uniffi_telio_fn_method_telio_start, uniffi_telio_fn_method_telio_stop,
};
use telio_bridge::telio::{
    Config, Event, Features, ForeignProtectCb, NodeState, PeerBase, Peer, RelayState, SecretKey,
    Server, TelioAdapterType, TelioError, TelioEventCb, TelioLogLevel, TelioLoggerCb,
    TelioProtectCb,
};

const WAIT: Duration = Duration::from_secs(5);

struct Recorder<T> {
    tx: Sender<T>,
}

fn recorder<T>() -> (Arc<Recorder<T>>, Receiver<T>) {
    let (tx, rx) = unbounded();
    (Arc::new(Recorder { tx }), rx)
}

impl TelioEventCb for Recorder<Event> {
    fn event(&self, payload: Event) -> Result<(), TelioError> {
        self.tx.send(payload).map_err(|_| TelioError::LockError)
    }
}

impl TelioLoggerCb for Recorder<(TelioLogLevel, String)> {
    fn log(&self, log_level: TelioLogLevel, payload: String) -> Result<(), TelioError> {
        let _ = self.tx.send((log_level, payload));
        Ok(())
    }
}

/// Rejects negative sockets and panics on zero.
struct Guard;

impl TelioProtectCb for Guard {
    fn protect(&self, socket_id: i32) -> Result<(), TelioError> {
        match socket_id {
            0 => panic!("socket zero"),
            id if id < 0 => Err(TelioError::InvalidString),
            _ => Ok(()),
        }
    }
}

fn ok(status: &mut RustCallStatus) {
    assert!(
        status.is_success(),
        "call failed with code {}",
        status.code
    );
}

fn meshnet(secret: &SecretKey) -> Config {
    let peer_key = SecretKey::generate().public();
    Config {
        this: PeerBase {
            identifier: "this".into(),
            public_key: secret.public(),
            hostname: "this.nord".into(),
            ip_addresses: Some(vec!["100.64.0.1".parse().unwrap()]),
            nickname: None,
        },
        peers: Some(vec![Peer {
            base: PeerBase {
                identifier: "peer-1".into(),
                public_key: peer_key,
                hostname: "peer-1.nord".into(),
                ip_addresses: Some(vec!["100.64.0.2".parse().unwrap()]),
                nickname: None,
            },
            is_local: false,
            allow_incoming_connections: true,
            allow_peer_send_files: false,
            allow_multicast: false,
            peer_allows_multicast: false,
        }]),
        derp_servers: Some(vec![Server {
            region_code: "de".into(),
            name: "de-1".into(),
            hostname: "de-1.derp".into(),
            ipv4: "10.0.0.1".parse().unwrap(),
            relay_port: 8765,
            stun_port: 3479,
            stun_plaintext_port: 3478,
            public_key: SecretKey::generate().public(),
            weight: 1,
            use_plain_text: true,
            conn_state: RelayState::Disconnected,
        }]),
        dns: None,
    }
}

#[test]
fn test_device_events_reach_host_object() {
    register_trampolines().unwrap();

    let (events, rx) = recorder::<Event>();
    let events_handle = EVENT_CALLBACKS.lower(events).unwrap();

    let mut st = RustCallStatus::new();
    let features = lower_into_buffer(&Json(Features::default())).unwrap();
    let device = uniffi_telio_fn_constructor_telio_new(features, events_handle, &mut st);
    ok(&mut st);

    let secret = SecretKey::generate();
    let key = lower_string(secret.to_string()).unwrap();
    let adapter = lower_into_buffer(&TelioAdapterType::BoringTun).unwrap();
    uniffi_telio_fn_method_telio_start(device, key, adapter, &mut st);
    ok(&mut st);

    let cfg = lower_into_buffer(&Json(meshnet(&secret))).unwrap();
    uniffi_telio_fn_method_telio_set_meshnet(device, cfg, &mut st);
    ok(&mut st);

    match rx.recv_timeout(WAIT).unwrap() {
        Event::Node(node) => {
            assert_eq!(node.identifier, "peer-1");
            assert_eq!(node.state, NodeState::Connecting);
        }
        other => panic!("expected node event, got {other:?}"),
    }
    match rx.recv_timeout(WAIT).unwrap() {
        Event::Relay(server) => assert_eq!(server.conn_state, RelayState::Connecting),
        other => panic!("expected relay event, got {other:?}"),
    }

    uniffi_telio_fn_method_telio_stop(device, &mut st);
    ok(&mut st);
    let mut stopped: Vec<Event> = (0..2).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    stopped.sort_by_key(|e| matches!(e, Event::Relay(_)));
    assert!(matches!(&stopped[0], Event::Node(n) if n.state == NodeState::Disconnected));
    assert!(matches!(&stopped[1], Event::Relay(s) if s.conn_state == RelayState::Disconnected));

    assert!(EVENT_CALLBACKS.get(events_handle).is_ok());
    uniffi_telio_fn_free_telio(device, &mut st);
    ok(&mut st);
    // Dropping the device released the host object through method 0.
    assert!(EVENT_CALLBACKS.get(events_handle).is_err());
}

#[test]
fn test_host_errors_and_panics_come_back_typed() {
    register_trampolines().unwrap();

    let handle = PROTECT_CALLBACKS.lower(Arc::new(Guard)).unwrap();
    let proxy = ForeignProtectCb::new(handle);

    assert_eq!(proxy.protect(12), Ok(()));
    assert_eq!(proxy.protect(-3), Err(TelioError::InvalidString));
    match proxy.protect(0) {
        Err(TelioError::UnknownError { inner }) => assert!(inner.contains("socket zero")),
        other => panic!("expected unknown error, got {other:?}"),
    }

    drop(proxy);
    assert!(PROTECT_CALLBACKS.get(handle).is_err());
}

#[test]
fn test_global_logger_forwards_to_host() {
    register_trampolines().unwrap();

    let (logger, rx) = recorder::<(TelioLogLevel, String)>();
    let handle = LOGGER_CALLBACKS.lower(logger).unwrap();

    let mut st = RustCallStatus::new();
    let level = lower_into_buffer(&TelioLogLevel::Info).unwrap();
    uniffi_telio_fn_func_set_global_logger(level, handle, &mut st);
    ok(&mut st);

    tracing::debug!(target: "callback_dispatch", "below the host level");
    tracing::warn!(target: "callback_dispatch", attempt = 2, "relay unreachable");

    let line = loop {
        let line = rx.recv_timeout(WAIT).unwrap();
        if line.1.starts_with("callback_dispatch:") {
            break line;
        }
    };
    assert_eq!(line.0, TelioLogLevel::Warning);
    assert_eq!(line.1, "callback_dispatch: relay unreachable attempt=2");
}
