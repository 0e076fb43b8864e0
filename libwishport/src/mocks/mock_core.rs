//----------------------------------------   Mock network core   -------------------------------------------------------

use crate::error::PortError;
use crate::handles::{ConnectionId, RelayKey, Wsid};
use crate::helpers::lock_or_recover;
use crate::network_core::{CoreSignal, Endpoint, NetworkCore};
use crate::port::CorePort;
use log::*;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

/// Something the mock core does through its port when the event is dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    Open { id: ConnectionId, ip: Ipv4Addr, port: u16, via_relay: bool },
    OpenDns { id: ConnectionId, host: String, port: u16, via_relay: bool },
    Close(ConnectionId),
    Send(ConnectionId, Vec<u8>),
    RelayOpen { relay: RelayKey, host: String, port: u16 },
    RelaySend(RelayKey, Vec<u8>),
    RelayClose(RelayKey),
    Advertise(Vec<u8>),
    DeliverToApp(Wsid, Vec<u8>),
    /// Dispatching queues `Chain(n - 1)` until n reaches zero.
    Chain(usize),
}

#[derive(Default)]
pub struct CoreRecord {
    pub pending: VecDeque<MockEvent>,
    pub dispatched: Vec<MockEvent>,
    pub outcomes: Vec<Result<(), PortError>>,
    pub fed: Vec<(Endpoint, Vec<u8>)>,
    pub signals: Vec<(Endpoint, CoreSignal)>,
    pub discovery: Vec<(SocketAddrV4, Vec<u8>)>,
    pub app_payloads: Vec<(Wsid, Vec<u8>)>,
    pub removed_services: Vec<Wsid>,
    pub periodic_ticks: usize,
    /// One-shot reactions: when the signal is raised, the event is queued.
    pub reactions: Vec<(CoreSignal, MockEvent)>,
    pub rx_capacity: usize,
    pub rx_used: HashMap<ConnectionId, usize>,
    pub next_connection: i32,
    pub free_slots: usize,
}

/// A handle on the mock core's state that stays with the test after the core is moved into a bridge.
#[derive(Clone, Default)]
pub struct CoreProbe(Arc<Mutex<CoreRecord>>);

impl CoreProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut CoreRecord) -> R) -> R {
        let mut record = lock_or_recover(&self.0, "mock core");
        f(&mut record)
    }

    pub fn queue(&self, event: MockEvent) {
        self.with(|r| r.pending.push_back(event));
    }

    pub fn react(&self, signal: CoreSignal, event: MockEvent) {
        self.with(|r| r.reactions.push((signal, event)));
    }

    pub fn pending(&self) -> usize {
        self.with(|r| r.pending.len())
    }

    pub fn dispatched(&self) -> Vec<MockEvent> {
        self.with(|r| r.dispatched.clone())
    }

    pub fn outcomes(&self) -> Vec<Result<(), PortError>> {
        self.with(|r| r.outcomes.clone())
    }

    pub fn last_outcome(&self) -> Option<Result<(), PortError>> {
        self.with(|r| r.outcomes.last().cloned())
    }

    pub fn signals(&self) -> Vec<(Endpoint, CoreSignal)> {
        self.with(|r| r.signals.clone())
    }

    pub fn fed(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.with(|r| r.fed.clone())
    }

    pub fn periodic_ticks(&self) -> usize {
        self.with(|r| r.periodic_ticks)
    }

    pub fn set_free_slots(&self, slots: usize) {
        self.with(|r| r.free_slots = slots);
    }
}

pub struct MockCore {
    probe: CoreProbe,
}

impl MockCore {
    /// A core whose connections have receive buffers of `rx_capacity` bytes.
    pub fn new(rx_capacity: usize) -> (Self, CoreProbe) {
        let probe = CoreProbe::default();
        probe.with(|r| {
            r.rx_capacity = rx_capacity;
            r.free_slots = 4;
        });
        (Self { probe: probe.clone() }, probe)
    }
}

impl NetworkCore for MockCore {
    type Event = MockEvent;

    fn next_pending_event(&mut self) -> Option<MockEvent> {
        self.probe.with(|r| r.pending.pop_front())
    }

    fn dispatch(&mut self, event: MockEvent, port: &mut dyn CorePort) {
        trace!("MockCore: dispatching {event:?}");
        // The probe is not locked while the port is in use.
        let outcome = match &event {
            MockEvent::Open { id, ip, port: remote, via_relay } => port.open_connection(*id, *ip, *remote, *via_relay),
            MockEvent::OpenDns { id, host, port: remote, via_relay } => {
                port.open_connection_dns(*id, host, *remote, *via_relay).map(|_| ())
            }
            MockEvent::Close(id) => port.close_connection(*id),
            MockEvent::Send(id, data) => port.send(*id, data).map(|_| ()),
            MockEvent::RelayOpen { relay, host, port: remote } => port.relay_open(*relay, host, *remote),
            MockEvent::RelaySend(relay, data) => port.relay_send(*relay, data).map(|_| ()),
            MockEvent::RelayClose(relay) => port.relay_close(*relay),
            MockEvent::Advertise(payload) => port.advertise(payload),
            MockEvent::DeliverToApp(wsid, payload) => port.deliver_to_app(wsid, payload),
            MockEvent::Chain(n) => {
                if *n > 0 {
                    self.probe.queue(MockEvent::Chain(n - 1));
                }
                Ok(())
            }
        };
        self.probe.with(|r| {
            r.dispatched.push(event);
            r.outcomes.push(outcome);
        });
    }

    fn feed(&mut self, endpoint: Endpoint, data: &[u8]) -> usize {
        self.probe.with(|r| {
            let accepted = match endpoint {
                Endpoint::Connection(id) => {
                    let capacity = r.rx_capacity;
                    let used = r.rx_used.entry(id).or_default();
                    let accepted = data.len().min(capacity - *used);
                    *used += accepted;
                    accepted
                }
                Endpoint::Relay(_) => data.len(),
            };
            r.fed.push((endpoint, data[..accepted].to_vec()));
            accepted
        })
    }

    fn notify(&mut self, endpoint: Endpoint, signal: CoreSignal, _port: &mut dyn CorePort) {
        self.probe.with(|r| {
            r.signals.push((endpoint, signal));
            if let Endpoint::Connection(id) = endpoint {
                match signal {
                    CoreSignal::Disconnected | CoreSignal::ClientDisconnected => {
                        r.rx_used.remove(&id);
                    }
                    CoreSignal::Connected | CoreSignal::ClientConnected | CoreSignal::RelaySessionConnected => {
                        r.rx_used.entry(id).or_default();
                    }
                    _ => {}
                }
            }
            let (fired, waiting): (Vec<_>, Vec<_>) = r.reactions.drain(..).partition(|(s, _)| *s == signal);
            r.reactions = waiting;
            r.pending.extend(fired.into_iter().map(|(_, event)| event));
        });
    }

    fn feed_local_discovery(&mut self, from: SocketAddrV4, payload: &[u8]) {
        self.probe.with(|r| r.discovery.push((from, payload.to_vec())));
    }

    fn accept_connection(&mut self) -> Option<ConnectionId> {
        self.probe.with(|r| {
            if r.free_slots == 0 {
                return None;
            }
            r.free_slots -= 1;
            let id = ConnectionId(100 + r.next_connection);
            r.next_connection += 1;
            r.rx_used.insert(id, 0);
            Some(id)
        })
    }

    fn rx_buffer_free(&self, id: ConnectionId) -> Option<usize> {
        self.probe.with(|r| r.rx_used.get(&id).map(|used| r.rx_capacity - used))
    }

    fn report_periodic(&mut self, _port: &mut dyn CorePort) {
        self.probe.with(|r| r.periodic_ticks += 1);
    }

    fn app_to_core(&mut self, wsid: &Wsid, payload: &[u8], _port: &mut dyn CorePort) {
        self.probe.with(|r| r.app_payloads.push((*wsid, payload.to_vec())));
    }

    fn remove_service(&mut self, wsid: &Wsid) {
        self.probe.with(|r| r.removed_services.push(*wsid));
    }
}
