//! Small integer handles shared by the bridge, the network core and the host, plus the state and signal enums
//! that travel with them.
//!
//! Connection ids are minted by the core, relay socket ids and file ids by the host, and resolve ids by the
//! bridge itself. None of them carry ownership; they are lookup keys only.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

macro_rules! integer_handle {
    ($name:ident, $label:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i32);

        impl $name {
            pub fn raw(&self) -> i32 {
                self.0
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                $name(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

integer_handle!(ConnectionId, "conn");
integer_handle!(RelayId, "relay-socket");
integer_handle!(RelayKey, "relay");
integer_handle!(FileId, "file");
integer_handle!(ResolveId, "resolve");

/// The kinds of handle the [`crate::registry::HandleRegistry`] can look up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Connection,
    Relay,
    File,
}

impl Display for HandleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleKind::Connection => write!(f, "connection"),
            HandleKind::Relay => write!(f, "relay"),
            HandleKind::File => write!(f, "file"),
        }
    }
}

/// A resolved handle. Relays are resolved from the host's socket id to the core's relay key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    Connection(ConnectionId),
    Relay(RelayKey),
    File(FileId),
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Handle::Connection(id) => write!(f, "{id}"),
            Handle::Relay(key) => write!(f, "{key}"),
            Handle::File(id) => write!(f, "{id}"),
        }
    }
}

/// Transport state of a connection as seen from the port layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Resolving,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// State of the relay control channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    Idle,
    Resolving,
    Connecting,
    Connected,
    Closing,
}

/// Connection events reported by the host, using the host's integer codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpSignal {
    Connected,
    Disconnected,
    ClientConnected,
    ClientDisconnected,
}

impl TcpSignal {
    pub const CONNECTED: i32 = 0;
    pub const DISCONNECTED: i32 = 1;
    pub const CLIENT_CONNECTED: i32 = 2;
    pub const CLIENT_DISCONNECTED: i32 = 3;

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::CONNECTED => Some(TcpSignal::Connected),
            Self::DISCONNECTED => Some(TcpSignal::Disconnected),
            Self::CLIENT_CONNECTED => Some(TcpSignal::ClientConnected),
            Self::CLIENT_DISCONNECTED => Some(TcpSignal::ClientDisconnected),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TcpSignal::Connected => Self::CONNECTED,
            TcpSignal::Disconnected => Self::DISCONNECTED,
            TcpSignal::ClientConnected => Self::CLIENT_CONNECTED,
            TcpSignal::ClientDisconnected => Self::CLIENT_DISCONNECTED,
        }
    }
}

/// Relay control channel events reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelaySignal {
    Disconnected,
    Connected,
}

impl RelaySignal {
    pub const DISCONNECTED: i32 = 1;
    pub const CONNECTED: i32 = 2;

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::DISCONNECTED => Some(RelaySignal::Disconnected),
            Self::CONNECTED => Some(RelaySignal::Connected),
            _ => None,
        }
    }
}

/// Length in bytes of a service id.
pub const WSID_LEN: usize = 32;

/// Identifies an application service registered with the core.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wsid([u8; WSID_LEN]);

impl Wsid {
    pub fn new(bytes: [u8; WSID_LEN]) -> Self {
        Wsid(bytes)
    }

    /// Returns `None` unless `bytes` is exactly [`WSID_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; WSID_LEN] = bytes.try_into().ok()?;
        Some(Wsid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; WSID_LEN] {
        &self.0
    }
}

impl Display for Wsid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Debug for Wsid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wsid({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tcp_signal_codes_match_host_constants() {
        for code in 0..4 {
            let signal = TcpSignal::from_code(code).expect("known code");
            assert_eq!(signal.code(), code);
        }
        assert_eq!(TcpSignal::from_code(4), None);
        assert_eq!(TcpSignal::from_code(-1), None);
    }

    #[test]
    fn relay_signal_codes() {
        assert_eq!(RelaySignal::from_code(1), Some(RelaySignal::Disconnected));
        assert_eq!(RelaySignal::from_code(2), Some(RelaySignal::Connected));
        assert_eq!(RelaySignal::from_code(10), None);
    }

    #[test]
    fn wsid_requires_exact_length() {
        assert!(Wsid::from_slice(&[7u8; WSID_LEN]).is_some());
        assert!(Wsid::from_slice(&[7u8; WSID_LEN - 1]).is_none());
        assert!(Wsid::from_slice(&[7u8; WSID_LEN + 1]).is_none());
        let wsid = Wsid::new([0xab; WSID_LEN]);
        assert_eq!(wsid.to_string(), "abababababababab");
    }

    #[test]
    fn handles_display_their_kind() {
        assert_eq!(ConnectionId(3).to_string(), "conn#3");
        assert_eq!(Handle::Relay(RelayKey(1)).to_string(), "relay#1");
        assert_eq!(HandleKind::File.to_string(), "file");
    }
}
