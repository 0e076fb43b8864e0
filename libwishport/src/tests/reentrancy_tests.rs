//! A host that calls back into the bridge from inside an outbound call, on the thread that is draining the core.

use super::{fixture_with, TestBridge};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handles::{ConnectionId, TcpSignal};
use crate::mocks::{HostCall, MockEvent};
use crate::network_core::{CoreSignal, Endpoint};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

type Slot = Arc<OnceLock<Weak<TestBridge>>>;

#[test]
fn disconnect_signalled_from_inside_close() {
    let slot: Slot = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let hook_slot = Arc::clone(&slot);
    let hook_seen = Arc::clone(&seen);
    let f = fixture_with(BridgeConfig::default(), move |host| {
        host.on_close(Box::new(move |id: ConnectionId| {
            let Some(bridge) = hook_slot.get().and_then(Weak::upgrade) else {
                return;
            };
            let signalled = bridge.signal_event(id.raw(), TcpSignal::DISCONNECTED);
            let accepted = bridge.accept_server_connection().map(|_| ());
            hook_seen.lock().expect("hook results").push((signalled, accepted));
        }))
    });
    slot.set(Arc::downgrade(&f.bridge)).ok();

    let conn = ConnectionId(1);
    f.connect(conn, false);
    f.core.queue(MockEvent::Close(conn));
    f.bridge.process_connections().expect("drain to complete");

    let seen = seen.lock().expect("hook results").clone();
    assert_eq!(seen, vec![(Ok(()), Err(BridgeError::Reentrant))]);
    assert_eq!(f.host.count(|c| *c == HostCall::CloseConnection(conn)), 1);
    assert_eq!(f.core.signals().last(), Some(&(Endpoint::Connection(conn), CoreSignal::Disconnected)));
    assert!(f.bridge.registry().connection(conn).is_none());
    assert_eq!(f.core.pending(), 0);
}

#[test]
fn reentrant_drain_is_left_to_the_running_one() {
    let slot: Slot = Arc::new(OnceLock::new());
    let hook_slot = Arc::clone(&slot);
    let f = fixture_with(BridgeConfig::default(), move |host| {
        host.on_close(Box::new(move |_: ConnectionId| {
            if let Some(bridge) = hook_slot.get().and_then(Weak::upgrade) {
                bridge.process_connections().expect("a re-entrant drain is a no-op");
            }
        }))
    });
    slot.set(Arc::downgrade(&f.bridge)).ok();

    let conn = ConnectionId(2);
    f.connect(conn, false);
    f.core.react(CoreSignal::Disconnected, MockEvent::Chain(1));
    f.core.queue(MockEvent::Close(conn));
    f.bridge.process_connections().unwrap();
    // The host reports the disconnect once the close has returned
    f.bridge.signal_event(conn.raw(), TcpSignal::DISCONNECTED).unwrap();

    assert_eq!(f.core.pending(), 0);
    assert_eq!(f.core.dispatched().iter().filter(|e| matches!(e, MockEvent::Chain(_))).count(), 2);
}

#[test]
fn host_detaches_itself_from_inside_close() {
    let slot: Slot = Arc::new(OnceLock::new());
    let detached = Arc::new(Mutex::new(Vec::new()));

    let hook_slot = Arc::clone(&slot);
    let hook_detached = Arc::clone(&detached);
    let f = fixture_with(BridgeConfig::default(), move |host| {
        host.on_close(Box::new(move |_: ConnectionId| {
            if let Some(bridge) = hook_slot.get().and_then(Weak::upgrade) {
                hook_detached.lock().expect("hook results").push(bridge.detach_host().is_none());
            }
        }))
    });
    slot.set(Arc::downgrade(&f.bridge)).ok();

    let conn = ConnectionId(1);
    f.connect(conn, false);
    f.core.queue(MockEvent::Close(conn));

    let (done, finished) = mpsc::channel();
    let bridge = Arc::clone(&f.bridge);
    std::thread::spawn(move || done.send(bridge.process_connections()).ok());
    let result = finished.recv_timeout(Duration::from_secs(5)).expect("the drain to return");

    assert_eq!(result, Ok(()));
    assert_eq!(*detached.lock().expect("hook results"), vec![true]);
    assert!(!f.bridge.monitor().is_attached());
    assert_eq!(f.bridge.process_connections(), Err(BridgeError::ShutDown));
    let (attached, released) = f.host.with(|s| (s.contexts_attached, s.contexts_released));
    assert_eq!(attached, released);
}

#[test]
fn values_cannot_be_read_from_inside_a_host_call() {
    let slot: Slot = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let hook_slot = Arc::clone(&slot);
    let hook_seen = Arc::clone(&seen);
    let f = fixture_with(BridgeConfig::default(), move |host| {
        host.on_close(Box::new(move |id: ConnectionId| {
            let Some(bridge) = hook_slot.get().and_then(Weak::upgrade) else {
                return;
            };
            let empty = bridge.is_rx_buffer_empty(id.raw());
            let free = bridge.rx_buffer_free(id.raw());
            let port = bridge.port().map(|_| ());
            hook_seen.lock().expect("hook results").push((empty, free, port));
        }))
    });
    slot.set(Arc::downgrade(&f.bridge)).ok();

    let conn = ConnectionId(1);
    f.connect(conn, false);
    f.core.queue(MockEvent::Close(conn));
    f.bridge.process_connections().expect("drain to complete");

    let seen = seen.lock().expect("hook results").clone();
    let reentrant = BridgeError::Reentrant;
    assert_eq!(seen, vec![(Err(reentrant.clone()), Err(reentrant.clone()), Err(reentrant))]);
    assert_eq!(f.bridge.is_rx_buffer_empty(conn.raw()), Ok(true));
}
