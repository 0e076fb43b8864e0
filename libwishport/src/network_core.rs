//! The interface the port layer consumes from the network core.
//!
//! The core owns connection and relay state, protocol framing, identities and RPC; it performs no I/O. Every call
//! that may lead to I/O receives a [`CorePort`], through which the core reaches the host synchronously.

use crate::handles::{ConnectionId, RelayKey, Wsid};
use crate::port::CorePort;
use std::fmt::{Display, Formatter};
use std::net::SocketAddrV4;

/// A connection or a relay control channel. Never both, never neither.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Connection(ConnectionId),
    Relay(RelayKey),
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Connection(id) => write!(f, "{id}"),
            Endpoint::Relay(key) => write!(f, "{key}"),
        }
    }
}

/// Signals the port layer raises in the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoreSignal {
    /// An outgoing connection has connected.
    Connected,
    /// A connection opened to a relay server in order to accept a session waiting there has connected.
    RelaySessionConnected,
    Disconnected,
    /// An incoming connection accepted on the server port has connected.
    ClientConnected,
    ClientDisconnected,
    /// Bytes were fed to the endpoint.
    NewData,
    RelayConnected,
    RelayDisconnected,
}

impl Display for CoreSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreSignal::Connected => write!(f, "TCP_CONNECTED"),
            CoreSignal::RelaySessionConnected => write!(f, "TCP_RELAY_SESSION_CONNECTED"),
            CoreSignal::Disconnected => write!(f, "TCP_DISCONNECTED"),
            CoreSignal::ClientConnected => write!(f, "TCP_CLIENT_CONNECTED"),
            CoreSignal::ClientDisconnected => write!(f, "TCP_CLIENT_DISCONNECTED"),
            CoreSignal::NewData => write!(f, "NEW_DATA"),
            CoreSignal::RelayConnected => write!(f, "RELAY_CONNECTED"),
            CoreSignal::RelayDisconnected => write!(f, "RELAY_DISCONNECTED"),
        }
    }
}

pub trait NetworkCore: Send {
    type Event: Send;

    /// The next pending event, if any. Never blocks.
    fn next_pending_event(&mut self) -> Option<Self::Event>;

    /// Process one event. The core may call back into the host through `port` while doing so.
    fn dispatch(&mut self, event: Self::Event, port: &mut dyn CorePort);

    /// Append received bytes to the endpoint's receive buffer. Returns the number of bytes accepted.
    fn feed(&mut self, endpoint: Endpoint, data: &[u8]) -> usize;

    /// Raise a signal for the endpoint.
    fn notify(&mut self, endpoint: Endpoint, signal: CoreSignal, port: &mut dyn CorePort);

    /// A local discovery broadcast arrived from `from`.
    fn feed_local_discovery(&mut self, from: SocketAddrV4, payload: &[u8]);

    /// Allocate a connection for a socket the host accepted on the server port.
    fn accept_connection(&mut self) -> Option<ConnectionId>;

    /// Free space in the connection's receive buffer, or `None` if the connection does not exist.
    fn rx_buffer_free(&self, id: ConnectionId) -> Option<usize>;

    /// One timebase period has elapsed.
    fn report_periodic(&mut self, port: &mut dyn CorePort);

    /// An application sent a payload to the core.
    fn app_to_core(&mut self, wsid: &Wsid, payload: &[u8], port: &mut dyn CorePort);

    /// The host asks for a registered service to be removed.
    fn remove_service(&mut self, wsid: &Wsid);
}
