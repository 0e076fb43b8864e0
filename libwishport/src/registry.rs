//! The identifier registry.
//!
//! Maps the small integer handles that cross the boundary to what the port layer knows about them. The registry
//! never mints ids: connection ids come from the core, relay socket ids and file ids from the host. A lookup miss
//! is not an error of the registry; callers treat it as a lost race with a close and drop the operation.
//!
//! The tables sit behind their own lock, which is never held across a host call.

use crate::error::PortError;
use crate::handles::{ConnectionId, FileId, Handle, HandleKind, RelayId, RelayKey, RelayState, TransportState};
use crate::helpers::lock_or_recover;
use log::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// What the port layer remembers about a connection owned by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub state: TransportState,
    pub via_relay: bool,
    pub remote_port: u16,
}

impl ConnectionEntry {
    pub fn new(state: TransportState, remote_port: u16, via_relay: bool) -> Self {
        Self { state, via_relay, remote_port }
    }
}

/// The relay control channel of one relay client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayEntry {
    pub state: RelayState,
    pub host: String,
    pub port: u16,
    /// Assigned by the host once it has started connecting.
    pub socket: Option<RelayId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
}

/// Outcome of asking the registry to start closing a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseTransition {
    /// The handle moved to its closing state; the host should tear it down.
    Started,
    /// The handle was already closing or closed. Nothing further to do.
    AlreadyClosing,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    relays: HashMap<RelayKey, RelayEntry>,
    files: HashMap<FileId, FileEntry>,
}

#[derive(Default)]
pub struct HandleRegistry {
    tables: Mutex<Tables>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = lock_or_recover(&self.tables, "handle registry");
        f(&mut tables)
    }

    /// Look up a raw id of the given kind. Relays are looked up by the host's socket id.
    pub fn lookup(&self, kind: HandleKind, id: i32) -> Option<Handle> {
        self.with_tables(|t| match kind {
            HandleKind::Connection => {
                let id = ConnectionId(id);
                t.connections.contains_key(&id).then_some(Handle::Connection(id))
            }
            HandleKind::Relay => find_relay_by_socket(t, RelayId(id)).map(Handle::Relay),
            HandleKind::File => {
                let id = FileId(id);
                t.files.contains_key(&id).then_some(Handle::File(id))
            }
        })
    }

    //------------------------------------------   Connections   ----------------------------------------------------

    /// Start tracking a connection, replacing what was known about the id before.
    pub fn track_connection(&self, id: ConnectionId, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        let previous = self.with_tables(|t| t.connections.insert(id, entry));
        if let Some(prev) = previous {
            debug!("Connection {id} re-registered. Was {:?}, now {:?}", prev.state, entry.state);
        }
        previous
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.with_tables(|t| t.connections.get(&id).copied())
    }

    /// Sets the transport state and returns the previous one, or `None` if the id is unknown.
    pub fn set_connection_state(&self, id: ConnectionId, state: TransportState) -> Option<TransportState> {
        self.with_tables(|t| {
            let entry = t.connections.get_mut(&id)?;
            let previous = entry.state;
            entry.state = state;
            Some(previous)
        })
    }

    pub fn begin_connection_close(&self, id: ConnectionId) -> Option<CloseTransition> {
        self.with_tables(|t| {
            let entry = t.connections.get_mut(&id)?;
            match entry.state {
                TransportState::Closing | TransportState::Closed => Some(CloseTransition::AlreadyClosing),
                _ => {
                    entry.state = TransportState::Closing;
                    Some(CloseTransition::Started)
                }
            }
        })
    }

    pub fn release_connection(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.with_tables(|t| t.connections.remove(&id))
    }

    pub fn connection_count(&self) -> usize {
        self.with_tables(|t| t.connections.len())
    }

    //---------------------------------------   Relay control channel   --------------------------------------------

    /// Register a relay client that wants a control channel.
    ///
    /// A relay that is not yet known counts against `limit`. A known relay may be re-opened from `Idle`, or from
    /// `Closing`, in which case the mapping of its old socket is dropped and late signals for it are ignored.
    pub fn track_relay(&self, key: RelayKey, host: &str, port: u16, limit: usize) -> Result<(), PortError> {
        self.with_tables(|t| {
            if let Some(entry) = t.relays.get_mut(&key) {
                if !matches!(entry.state, RelayState::Idle | RelayState::Closing) {
                    return Err(PortError::invalid_state(format!("{key} is already {:?}", entry.state)));
                }
                if let Some(old) = entry.socket.take() {
                    debug!("{key} re-opened while closing. Forgetting {old}");
                }
                entry.state = RelayState::Idle;
                entry.host = host.to_string();
                entry.port = port;
                return Ok(());
            }
            if t.relays.len() >= limit {
                return Err(PortError::RelayLimit(limit));
            }
            let entry = RelayEntry { state: RelayState::Idle, host: host.to_string(), port, socket: None };
            t.relays.insert(key, entry);
            Ok(())
        })
    }

    pub fn relay(&self, key: RelayKey) -> Option<RelayEntry> {
        self.with_tables(|t| t.relays.get(&key).cloned())
    }

    pub fn relay_by_socket(&self, socket: RelayId) -> Option<RelayKey> {
        self.with_tables(|t| find_relay_by_socket(t, socket))
    }

    pub fn set_relay_state(&self, key: RelayKey, state: RelayState) -> Option<RelayState> {
        self.with_tables(|t| {
            let entry = t.relays.get_mut(&key)?;
            let previous = entry.state;
            entry.state = state;
            Some(previous)
        })
    }

    pub fn attach_relay_socket(&self, key: RelayKey, socket: RelayId) -> bool {
        self.with_tables(|t| match t.relays.get_mut(&key) {
            Some(entry) => {
                entry.socket = Some(socket);
                true
            }
            None => false,
        })
    }

    /// Moves the relay to `Closing` and hands back the socket the host must tear down.
    pub fn begin_relay_close(&self, key: RelayKey) -> Option<(CloseTransition, Option<RelayId>)> {
        self.with_tables(|t| {
            let entry = t.relays.get_mut(&key)?;
            if entry.state == RelayState::Closing {
                return Some((CloseTransition::AlreadyClosing, entry.socket));
            }
            entry.state = RelayState::Closing;
            Some((CloseTransition::Started, entry.socket))
        })
    }

    pub fn release_relay(&self, key: RelayKey) -> Option<RelayEntry> {
        self.with_tables(|t| t.relays.remove(&key))
    }

    pub fn relay_count(&self) -> usize {
        self.with_tables(|t| t.relays.len())
    }

    //-----------------------------------------------   Files   ----------------------------------------------------

    pub fn track_file(&self, id: FileId, name: &str) {
        let previous = self.with_tables(|t| t.files.insert(id, FileEntry { name: name.to_string() }));
        if let Some(prev) = previous {
            warn!("Host re-used {id} (was {}) for {name}", prev.name);
        }
    }

    pub fn file(&self, id: FileId) -> Option<FileEntry> {
        self.with_tables(|t| t.files.get(&id).cloned())
    }

    pub fn release_file(&self, id: FileId) -> Option<FileEntry> {
        self.with_tables(|t| t.files.remove(&id))
    }
}

fn find_relay_by_socket(tables: &Tables, socket: RelayId) -> Option<RelayKey> {
    tables.relays.iter().find(|(_, entry)| entry.socket == Some(socket)).map(|(key, _)| *key)
}
