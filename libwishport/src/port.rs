//! The capability interface the network core depends on for all of its I/O.
//!
//! The core never reaches the host through globals; it is handed a `CorePort` for each call that may need I/O.
//! [`crate::adapters::PortAdapters`] is the implementation backed by a host.

use crate::error::PortError;
use crate::handles::{ConnectionId, FileId, RelayKey, ResolveId, Wsid};
use crate::network_core::Endpoint;
use std::io::SeekFrom;
use std::net::Ipv4Addr;

pub trait CorePort {
    //--------------------------------------------   Connections   -----------------------------------------------

    /// Ask the host to connect to a resolved address. The outcome arrives later as a connection signal.
    fn open_connection(&mut self, id: ConnectionId, ip: Ipv4Addr, port: u16, via_relay: bool) -> Result<(), PortError>;

    /// Resolve `host` first, then connect. The remote port and relay flag are remembered for when the
    /// resolution completes.
    fn open_connection_dns(
        &mut self,
        id: ConnectionId,
        host: &str,
        port: u16,
        via_relay: bool,
    ) -> Result<ResolveId, PortError>;

    /// Closing a connection that is already closing is a no-op.
    fn close_connection(&mut self, id: ConnectionId) -> Result<(), PortError>;

    /// Returns the number of bytes the host sent. A short count is logged, not treated as an error.
    fn send(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, PortError>;

    //----------------------------------------   Relay control channel   -----------------------------------------

    /// Open the control channel of a relay client to `host`, resolving it first unless it is an IPv4 literal.
    /// A relay whose channel is still closing may be re-opened; signals for its old channel are then ignored.
    fn relay_open(&mut self, relay: RelayKey, host: &str, port: u16) -> Result<(), PortError>;

    fn relay_open_resolved(&mut self, relay: RelayKey, ip: Ipv4Addr) -> Result<(), PortError>;

    fn relay_send(&mut self, relay: RelayKey, data: &[u8]) -> Result<usize, PortError>;

    fn relay_close(&mut self, relay: RelayKey) -> Result<(), PortError>;

    //--------------------------------------   Name resolution & discovery   -------------------------------------

    /// Start resolving `qname` on behalf of `target`. Completion arrives later, possibly on another thread.
    fn resolve(&mut self, target: Endpoint, qname: &str) -> Result<ResolveId, PortError>;

    /// Broadcast a local discovery advertisement. Fire and forget.
    fn advertise(&mut self, payload: &[u8]) -> Result<(), PortError>;

    /// The host's address on the local network, or `None` if it has none.
    fn local_ip(&mut self) -> Result<Option<String>, PortError>;

    /// The port at which the core accepts incoming connections.
    fn server_port(&self) -> u16;

    //-----------------------------------------------   Files   -------------------------------------------------

    fn file_open(&mut self, name: &str) -> Result<FileId, PortError>;

    fn file_close(&mut self, id: FileId) -> Result<(), PortError>;

    fn file_read(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, PortError>;

    fn file_write(&mut self, id: FileId, data: &[u8]) -> Result<usize, PortError>;

    fn file_seek(&mut self, id: FileId, pos: SeekFrom) -> Result<u64, PortError>;

    fn file_rename(&mut self, old_name: &str, new_name: &str) -> Result<(), PortError>;

    fn file_remove(&mut self, name: &str) -> Result<(), PortError>;

    //--------------------------------------------   Applications   ----------------------------------------------

    /// Deliver an RPC payload to the application registered as `wsid`.
    fn deliver_to_app(&mut self, wsid: &Wsid, payload: &[u8]) -> Result<(), PortError>;
}
