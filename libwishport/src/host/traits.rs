//-------------------------------------------   Execution context   ----------------------------------------------------

use crate::error::HostError;
use crate::handles::{ConnectionId, FileId, RelayId, ResolveId, Wsid};
use std::io::SeekFrom;
use std::net::Ipv4Addr;

/// Hosts whose runtime needs a per-thread execution context (e.g. a VM thread attachment) implement this.
///
/// `attach_context` is called before every boundary call. If it returns `true` the context was attached for this
/// call only, and `detach_context` is called exactly once when the call exits.
pub trait BoundaryContext {
    fn attach_context(&mut self) -> Result<bool, HostError> {
        Ok(false)
    }

    fn detach_context(&mut self) {}
}

//-----------------------------------------------   Sockets   ----------------------------------------------------------

pub trait SocketHost {
    /// Start an asynchronous connect. The host reports the outcome with a connection signal for `id`.
    fn connect(&mut self, id: ConnectionId, ip: Ipv4Addr, port: u16) -> Result<(), HostError>;

    fn close_connection(&mut self, id: ConnectionId) -> Result<(), HostError>;

    /// Returns the number of bytes sent.
    fn send_data(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, HostError>;

    fn broadcast_discovery(&mut self, payload: &[u8]) -> Result<(), HostError>;

    /// The address of the local network interface as text. An empty string means there is none.
    fn local_ip(&mut self) -> Result<String, HostError>;
}

//----------------------------------------   Relay control connection   ------------------------------------------------

pub trait RelayHost {
    /// Start connecting to a relay server. The returned id identifies the channel in later relay signals.
    fn relay_connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<RelayId, HostError>;

    fn relay_send(&mut self, id: RelayId, data: &[u8]) -> Result<usize, HostError>;

    fn relay_close(&mut self, id: RelayId) -> Result<(), HostError>;
}

//------------------------------------------   Name resolution   -------------------------------------------------------

pub trait ResolverHost {
    /// Start resolving `qname` without blocking. The host later reports the result for `id`, on any thread.
    fn start_resolving(&mut self, qname: &str, id: ResolveId) -> Result<(), HostError>;
}

//--------------------------------------------   File system   ---------------------------------------------------------

/// Host file primitives. Negative codes are reported as [`HostError::Code`] and reach the core unchanged.
pub trait FileHost {
    fn open_file(&mut self, name: &str) -> Result<FileId, HostError>;

    fn close_file(&mut self, id: FileId) -> Result<(), HostError>;

    /// Returns the number of bytes read into `buf`. Zero means end of file.
    fn read_file(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, HostError>;

    fn write_file(&mut self, id: FileId, data: &[u8]) -> Result<usize, HostError>;

    fn seek_file(&mut self, id: FileId, pos: SeekFrom) -> Result<u64, HostError>;

    fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<(), HostError>;

    fn remove_file(&mut self, name: &str) -> Result<(), HostError>;
}

//--------------------------------------------   Applications   --------------------------------------------------------

pub trait AppHost {
    fn deliver_to_app(&mut self, wsid: &Wsid, payload: &[u8]) -> Result<(), HostError>;

    /// Ask the host to shut the whole service down in an orderly way.
    fn request_shutdown(&mut self) -> Result<(), HostError>;
}

//-----------------------------------   Convenience all-inclusive host trait   -----------------------------------------

pub trait PortHost: Send + BoundaryContext + SocketHost + RelayHost + ResolverHost + FileHost + AppHost {}
