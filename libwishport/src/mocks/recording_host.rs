//---------------------------------------   Recording host   -----------------------------------------------------------

use crate::error::HostError;
use crate::handles::{ConnectionId, FileId, RelayId, ResolveId, Wsid};
use crate::helpers::lock_or_recover;
use crate::host::{AppHost, BoundaryContext, FileHost, PortHost, RelayHost, ResolverHost, SocketHost};
use log::*;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// One call the bridge made into the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCall {
    Connect { id: ConnectionId, ip: Ipv4Addr, port: u16 },
    CloseConnection(ConnectionId),
    Send { id: ConnectionId, data: Vec<u8> },
    Broadcast(Vec<u8>),
    StartResolving { qname: String, id: ResolveId },
    RelayConnect { ip: Ipv4Addr, port: u16 },
    RelaySend { id: RelayId, data: Vec<u8> },
    RelayClose(RelayId),
    OpenFile(String),
    CloseFile(FileId),
    ReadFile(FileId),
    WriteFile(FileId, Vec<u8>),
    SeekFile(FileId, SeekFrom),
    RenameFile(String, String),
    RemoveFile(String),
    LocalIp,
    DeliverToApp { wsid: Wsid, payload: Vec<u8> },
    RequestShutdown,
}

pub struct HostState {
    pub calls: Vec<HostCall>,
    pub local_ip: String,
    /// Caps how many bytes a single send reports as sent.
    pub send_limit: Option<usize>,
    pub refuse_resolving: bool,
    pub connect_error: Option<HostError>,
    /// Every file primitive fails with this code when set.
    pub file_error: Option<i32>,
    pub files: HashMap<String, Vec<u8>>,
    pub open_files: HashMap<FileId, (String, usize)>,
    pub next_file: i32,
    pub next_relay_socket: i32,
    /// Whether the host asks for an execution context around each call.
    pub needs_context: bool,
    pub contexts_attached: usize,
    pub contexts_released: usize,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            local_ip: "192.168.1.20".to_string(),
            send_limit: None,
            refuse_resolving: false,
            connect_error: None,
            file_error: None,
            files: HashMap::new(),
            open_files: HashMap::new(),
            next_file: 3,
            next_relay_socket: 50,
            needs_context: true,
            contexts_attached: 0,
            contexts_released: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct HostProbe(Arc<Mutex<HostState>>);

impl HostProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut HostState) -> R) -> R {
        let mut state = lock_or_recover(&self.0, "recording host");
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(*c)).count())
    }

    pub fn clear(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn last_resolve_id(&self) -> Option<ResolveId> {
        self.with(|s| {
            s.calls.iter().rev().find_map(|c| match c {
                HostCall::StartResolving { id, .. } => Some(*id),
                _ => None,
            })
        })
    }

    fn record(&self, call: HostCall) {
        trace!("RecordingHost: {call:?}");
        self.with(|s| s.calls.push(call));
    }
}

pub type CloseHook = Box<dyn FnMut(ConnectionId) + Send>;

/// A host that records every call and keeps its files in memory.
pub struct RecordingHost {
    probe: HostProbe,
    on_close: Option<CloseHook>,
}

impl RecordingHost {
    pub fn new() -> (Self, HostProbe) {
        let probe = HostProbe::default();
        (Self { probe: probe.clone(), on_close: None }, probe)
    }

    /// Run `hook` from inside `close_connection`, the way a host that signals the disconnect synchronously would.
    pub fn on_close(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    fn file_error(&self) -> Result<(), HostError> {
        match self.probe.with(|s| s.file_error) {
            Some(code) => Err(HostError::Code(code)),
            None => Ok(()),
        }
    }
}

impl BoundaryContext for RecordingHost {
    fn attach_context(&mut self) -> Result<bool, HostError> {
        Ok(self.probe.with(|s| {
            if s.needs_context {
                s.contexts_attached += 1;
            }
            s.needs_context
        }))
    }

    fn detach_context(&mut self) {
        self.probe.with(|s| s.contexts_released += 1);
    }
}

impl SocketHost for RecordingHost {
    fn connect(&mut self, id: ConnectionId, ip: Ipv4Addr, port: u16) -> Result<(), HostError> {
        self.probe.record(HostCall::Connect { id, ip, port });
        match self.probe.with(|s| s.connect_error.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close_connection(&mut self, id: ConnectionId) -> Result<(), HostError> {
        self.probe.record(HostCall::CloseConnection(id));
        if let Some(hook) = self.on_close.as_mut() {
            hook(id);
        }
        Ok(())
    }

    fn send_data(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, HostError> {
        self.probe.record(HostCall::Send { id, data: data.to_vec() });
        let limit = self.probe.with(|s| s.send_limit);
        Ok(limit.map_or(data.len(), |limit| data.len().min(limit)))
    }

    fn broadcast_discovery(&mut self, payload: &[u8]) -> Result<(), HostError> {
        self.probe.record(HostCall::Broadcast(payload.to_vec()));
        Ok(())
    }

    fn local_ip(&mut self) -> Result<String, HostError> {
        self.probe.record(HostCall::LocalIp);
        Ok(self.probe.with(|s| s.local_ip.clone()))
    }
}

impl RelayHost for RecordingHost {
    fn relay_connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<RelayId, HostError> {
        self.probe.record(HostCall::RelayConnect { ip, port });
        Ok(self.probe.with(|s| {
            let id = RelayId(s.next_relay_socket);
            s.next_relay_socket += 1;
            id
        }))
    }

    fn relay_send(&mut self, id: RelayId, data: &[u8]) -> Result<usize, HostError> {
        self.probe.record(HostCall::RelaySend { id, data: data.to_vec() });
        Ok(data.len())
    }

    fn relay_close(&mut self, id: RelayId) -> Result<(), HostError> {
        self.probe.record(HostCall::RelayClose(id));
        Ok(())
    }
}

impl ResolverHost for RecordingHost {
    fn start_resolving(&mut self, qname: &str, id: ResolveId) -> Result<(), HostError> {
        self.probe.record(HostCall::StartResolving { qname: qname.to_string(), id });
        if self.probe.with(|s| s.refuse_resolving) {
            return Err(HostError::failed("resolver is offline"));
        }
        Ok(())
    }
}

impl FileHost for RecordingHost {
    fn open_file(&mut self, name: &str) -> Result<FileId, HostError> {
        self.probe.record(HostCall::OpenFile(name.to_string()));
        self.file_error()?;
        Ok(self.probe.with(|s| {
            s.files.entry(name.to_string()).or_default();
            let id = FileId(s.next_file);
            s.next_file += 1;
            s.open_files.insert(id, (name.to_string(), 0));
            id
        }))
    }

    fn close_file(&mut self, id: FileId) -> Result<(), HostError> {
        self.probe.record(HostCall::CloseFile(id));
        self.file_error()?;
        self.probe.with(|s| s.open_files.remove(&id)).map(|_| ()).ok_or(HostError::Code(-9))
    }

    fn read_file(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, HostError> {
        self.probe.record(HostCall::ReadFile(id));
        self.file_error()?;
        self.probe.with(|s| {
            let (name, pos) = s.open_files.get_mut(&id).ok_or(HostError::Code(-9))?;
            let content = s.files.get(name.as_str()).ok_or(HostError::Code(-2))?;
            let start = (*pos).min(content.len());
            let n = buf.len().min(content.len() - start);
            buf[..n].copy_from_slice(&content[start..start + n]);
            *pos = start + n;
            Ok(n)
        })
    }

    fn write_file(&mut self, id: FileId, data: &[u8]) -> Result<usize, HostError> {
        self.probe.record(HostCall::WriteFile(id, data.to_vec()));
        self.file_error()?;
        self.probe.with(|s| {
            let (name, pos) = s.open_files.get_mut(&id).ok_or(HostError::Code(-9))?;
            let content = s.files.entry(name.clone()).or_default();
            let end = *pos + data.len();
            if content.len() < end {
                content.resize(end, 0);
            }
            content[*pos..end].copy_from_slice(data);
            *pos = end;
            Ok(data.len())
        })
    }

    fn seek_file(&mut self, id: FileId, pos: SeekFrom) -> Result<u64, HostError> {
        self.probe.record(HostCall::SeekFile(id, pos));
        self.file_error()?;
        self.probe.with(|s| {
            let (name, current) = s.open_files.get_mut(&id).ok_or(HostError::Code(-9))?;
            let len = s.files.get(name.as_str()).map_or(0, |c| c.len()) as i64;
            let target = match pos {
                SeekFrom::Start(offset) => offset as i64,
                SeekFrom::Current(offset) => *current as i64 + offset,
                SeekFrom::End(offset) => len + offset,
            };
            if target < 0 {
                return Err(HostError::Code(-22));
            }
            *current = target as usize;
            Ok(target as u64)
        })
    }

    fn rename_file(&mut self, old_name: &str, new_name: &str) -> Result<(), HostError> {
        self.probe.record(HostCall::RenameFile(old_name.to_string(), new_name.to_string()));
        self.file_error()?;
        self.probe.with(|s| {
            let content = s.files.remove(old_name).ok_or(HostError::Code(-2))?;
            s.files.insert(new_name.to_string(), content);
            Ok(())
        })
    }

    fn remove_file(&mut self, name: &str) -> Result<(), HostError> {
        self.probe.record(HostCall::RemoveFile(name.to_string()));
        self.file_error()?;
        self.probe.with(|s| s.files.remove(name)).map(|_| ()).ok_or(HostError::Code(-2))
    }
}

impl AppHost for RecordingHost {
    fn deliver_to_app(&mut self, wsid: &Wsid, payload: &[u8]) -> Result<(), HostError> {
        self.probe.record(HostCall::DeliverToApp { wsid: *wsid, payload: payload.to_vec() });
        Ok(())
    }

    fn request_shutdown(&mut self) -> Result<(), HostError> {
        self.probe.record(HostCall::RequestShutdown);
        Ok(())
    }
}

impl PortHost for RecordingHost {}
