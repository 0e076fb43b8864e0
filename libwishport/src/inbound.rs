//! Host-to-core traffic: bytes, lifecycle signals and resolution completions.
//!
//! Each [`Inbound`] is applied with exclusive access to the core. The caller drains the core afterwards, whether
//! or not applying succeeded.

use crate::bridge::BridgeShared;
use crate::error::PortError;
use crate::handles::{
    ConnectionId, Handle, HandleKind, RelayId, RelayKey, RelaySignal, RelayState, ResolveId, TcpSignal, TransportState,
    Wsid,
};
use crate::network_core::{CoreSignal, Endpoint, NetworkCore};
use crate::port::CorePort;
use log::*;
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Work for the core, either applied at once or queued while the core is busy on the calling thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    ConnectionData { id: i32, data: Vec<u8> },
    ConnectionSignal { id: i32, code: i32 },
    LocalDiscovery { from: SocketAddrV4, payload: Vec<u8> },
    RelayData { id: i32, data: Vec<u8> },
    RelaySignal { id: i32, code: i32 },
    ResolutionCompleted { id: ResolveId, address: Option<Ipv4Addr> },
    AppToCore { wsid: Wsid, payload: Vec<u8> },
    RemoveService { wsid: Wsid },
    Periodic,
}

impl Display for Inbound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Inbound::ConnectionData { id, data } => write!(f, "{} bytes for conn#{id}", data.len()),
            Inbound::ConnectionSignal { id, code } => write!(f, "signal {code} for conn#{id}"),
            Inbound::LocalDiscovery { from, payload } => write!(f, "{} discovery bytes from {from}", payload.len()),
            Inbound::RelayData { id, data } => write!(f, "{} bytes for relay-socket#{id}", data.len()),
            Inbound::RelaySignal { id, code } => write!(f, "relay signal {code} for relay-socket#{id}"),
            Inbound::ResolutionCompleted { id, address: Some(ip) } => write!(f, "{id} resolved to {ip}"),
            Inbound::ResolutionCompleted { id, address: None } => write!(f, "{id} failed"),
            Inbound::AppToCore { wsid, payload } => write!(f, "{} bytes from app {wsid}", payload.len()),
            Inbound::RemoveService { wsid } => write!(f, "removal of service {wsid}"),
            Inbound::Periodic => write!(f, "timebase tick"),
        }
    }
}

pub(crate) fn apply<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    inbound: Inbound,
) -> Result<(), PortError> {
    trace!("Applying {inbound}");
    match inbound {
        Inbound::ConnectionData { id, data } => feed_connection(shared, core, port, id, &data),
        Inbound::ConnectionSignal { id, code } => connection_signal(shared, core, port, id, code),
        Inbound::LocalDiscovery { from, payload } => {
            core.feed_local_discovery(from, &payload);
            Ok(())
        }
        Inbound::RelayData { id, data } => feed_relay(shared, core, port, id, &data),
        Inbound::RelaySignal { id, code } => relay_signal(shared, core, port, id, code),
        Inbound::ResolutionCompleted { id, address } => complete_resolution(shared, core, port, id, address),
        Inbound::AppToCore { wsid, payload } => {
            core.app_to_core(&wsid, &payload, port);
            Ok(())
        }
        Inbound::RemoveService { wsid } => {
            core.remove_service(&wsid);
            Ok(())
        }
        Inbound::Periodic => {
            core.report_periodic(port);
            Ok(())
        }
    }
}

//---------------------------------------------   Connections   --------------------------------------------------------

fn feed_connection<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    id: i32,
    data: &[u8],
) -> Result<(), PortError> {
    let Some(Handle::Connection(conn)) = shared.registry.lookup(HandleKind::Connection, id) else {
        warn!("feed_data: conn#{id} is unknown. Dropping {} bytes", data.len());
        return Err(PortError::unknown(HandleKind::Connection, id));
    };
    let endpoint = Endpoint::Connection(conn);
    let accepted = core.feed(endpoint, data);
    if accepted < data.len() {
        warn!("{conn}: the receive buffer took {accepted} of {} bytes", data.len());
    }
    core.notify(endpoint, CoreSignal::NewData, port);
    Ok(())
}

fn connection_signal<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    id: i32,
    code: i32,
) -> Result<(), PortError> {
    let Some(signal) = TcpSignal::from_code(code) else {
        warn!("signal_event: unknown signal {code} for conn#{id}");
        return Err(PortError::invalid_input(format!("Unknown connection signal {code}")));
    };
    let conn = ConnectionId(id);
    let Some(entry) = shared.registry.connection(conn) else {
        warn!("signal_event: {signal:?} for unknown {conn}. Dropping");
        return Err(PortError::unknown(HandleKind::Connection, id));
    };
    let endpoint = Endpoint::Connection(conn);
    let closing = matches!(entry.state, TransportState::Closing | TransportState::Closed);
    if closing && matches!(signal, TcpSignal::Connected | TcpSignal::ClientConnected) {
        debug!("{conn} connected after it started closing. Ignoring {signal:?}");
        return Ok(());
    }
    match signal {
        TcpSignal::Connected => {
            shared.registry.set_connection_state(conn, TransportState::Connected);
            let signal = if entry.via_relay { CoreSignal::RelaySessionConnected } else { CoreSignal::Connected };
            debug!("{conn} connected. Raising {signal}");
            core.notify(endpoint, signal, port);
        }
        TcpSignal::ClientConnected => {
            shared.registry.set_connection_state(conn, TransportState::Connected);
            debug!("{conn} accepted");
            core.notify(endpoint, CoreSignal::ClientConnected, port);
        }
        TcpSignal::Disconnected | TcpSignal::ClientDisconnected => {
            shared.registry.set_connection_state(conn, TransportState::Closed);
            shared.resolver.withdraw(endpoint);
            let signal = match signal {
                TcpSignal::Disconnected => CoreSignal::Disconnected,
                _ => CoreSignal::ClientDisconnected,
            };
            debug!("{conn} disconnected. Raising {signal}");
            core.notify(endpoint, signal, port);
            shared.registry.release_connection(conn);
        }
    }
    Ok(())
}

//------------------------------------------   Relay control channel   -------------------------------------------------

fn relay_key<H>(shared: &BridgeShared<H>, call: &str, id: i32) -> Result<RelayKey, PortError> {
    shared.registry.relay_by_socket(RelayId(id)).ok_or_else(|| {
        warn!("{call}: relay-socket#{id} is unknown");
        PortError::unknown(HandleKind::Relay, id)
    })
}

fn feed_relay<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    id: i32,
    data: &[u8],
) -> Result<(), PortError> {
    let relay = relay_key(shared, "relay_control_feed", id)?;
    let endpoint = Endpoint::Relay(relay);
    let accepted = core.feed(endpoint, data);
    if accepted < data.len() {
        warn!("{relay}: the ring buffer took {accepted} of {} bytes", data.len());
    }
    core.notify(endpoint, CoreSignal::NewData, port);
    Ok(())
}

fn relay_signal<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    id: i32,
    code: i32,
) -> Result<(), PortError> {
    let Some(signal) = RelaySignal::from_code(code) else {
        warn!("relay_control_signal: unknown signal {code} for relay-socket#{id}");
        return Err(PortError::invalid_input(format!("Unknown relay signal {code}")));
    };
    let relay = relay_key(shared, "relay_control_signal", id)?;
    let endpoint = Endpoint::Relay(relay);
    match signal {
        RelaySignal::Connected => {
            shared.registry.set_relay_state(relay, RelayState::Connected);
            info!("The control channel of {relay} is connected");
            core.notify(endpoint, CoreSignal::RelayConnected, port);
        }
        RelaySignal::Disconnected => {
            info!("The control channel of {relay} is disconnected");
            core.notify(endpoint, CoreSignal::RelayDisconnected, port);
            shared.registry.release_relay(relay);
        }
    }
    Ok(())
}

//-------------------------------------------   Name resolution   ------------------------------------------------------

/// Hand a resolution result to whoever is waiting for it.
///
/// The pending record is taken before anything is dispatched, so a duplicate completion, or one for a target that
/// has been torn down in the meantime, finds nothing and is a no-op.
fn complete_resolution<C: NetworkCore, H>(
    shared: &BridgeShared<H>,
    core: &mut C,
    port: &mut dyn CorePort,
    id: ResolveId,
    address: Option<Ipv4Addr>,
) -> Result<(), PortError> {
    let Some(record) = shared.resolver.take(id) else {
        debug!("{id} completed, but nothing is waiting for it. Ignoring");
        return Ok(());
    };
    match (record.target, address) {
        (Endpoint::Connection(conn), None) => {
            warn!("Could not resolve {} for {conn}", record.qname);
            if shared.registry.set_connection_state(conn, TransportState::Closed).is_none() {
                debug!("{conn} is already gone");
                return Ok(());
            }
            core.notify(record.target, CoreSignal::Disconnected, port);
            shared.registry.release_connection(conn);
            Ok(())
        }
        (Endpoint::Relay(relay), None) => {
            warn!("Could not resolve {} for {relay}", record.qname);
            if shared.registry.relay(relay).is_none() {
                debug!("{relay} is already gone");
                return Ok(());
            }
            core.notify(record.target, CoreSignal::RelayDisconnected, port);
            shared.registry.release_relay(relay);
            Ok(())
        }
        (Endpoint::Connection(conn), Some(ip)) => {
            let Some(entry) = shared.registry.connection(conn) else {
                debug!("{conn} was torn down while {} was resolving", record.qname);
                return Ok(());
            };
            debug!("{} resolved to {ip} for {conn}", record.qname);
            port.open_connection(conn, ip, entry.remote_port, entry.via_relay)
        }
        (Endpoint::Relay(relay), Some(ip)) => {
            if shared.registry.relay(relay).is_none() {
                debug!("{relay} was torn down while {} was resolving", record.qname);
                return Ok(());
            }
            debug!("{} resolved to {ip} for {relay}", record.qname);
            port.relay_open_resolved(relay, ip)
        }
    }
}
