//! Outbound call adapters: the [`CorePort`] the bridge hands to the core.
//!
//! Every adapter validates its inputs, consults the registry, makes at most one call into the host through the
//! monitor and maps the outcome onto a [`PortError`]. Nothing escapes an adapter as a panic. Work that needs the
//! core again (a failed resolution start, the close of a connection that never reached the host) is deferred and
//! picked up by the drain that is running, or by the next entry point.

use crate::bridge::BridgeShared;
use crate::error::{HostError, PortError};
use crate::handles::{
    ConnectionId, FileId, HandleKind, RelayKey, RelayState, ResolveId, TcpSignal, TransportState, Wsid,
};
use crate::helpers::parse_ipv4_literal;
use crate::host::PortHost;
use crate::inbound::Inbound;
use crate::inspector;
use crate::network_core::Endpoint;
use crate::port::CorePort;
use crate::registry::{CloseTransition, ConnectionEntry};
use log::*;
use std::io::SeekFrom;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

pub struct PortAdapters<'a, H> {
    shared: &'a BridgeShared<H>,
}

impl<'a, H: PortHost> PortAdapters<'a, H> {
    pub(crate) fn new(shared: &'a BridgeShared<H>) -> Self {
        Self { shared }
    }

    /// One call into the host, with the host's own failure flattened into a [`PortError`].
    fn host_call<R>(&self, call: &str, f: impl FnOnce(&mut H) -> Result<R, HostError>) -> Result<R, PortError> {
        self.shared.monitor.with(call, f)?.map_err(|err| {
            warn!("{call}: {err}");
            PortError::Host(err)
        })
    }

    fn check_filename(&self, name: &str) -> Result<(), PortError> {
        let limit = self.shared.config.max_filename_len;
        if name.is_empty() {
            return Err(PortError::invalid_input("File name is empty"));
        }
        if name.len() > limit {
            warn!("File name {name} is longer than {limit} bytes");
            return Err(PortError::invalid_input(format!("File name is longer than {limit} bytes")));
        }
        Ok(())
    }

    fn check_file(&self, id: FileId) -> Result<(), PortError> {
        match self.shared.registry.file(id) {
            Some(_) => Ok(()),
            None => {
                warn!("{id} is not open");
                Err(PortError::unknown(HandleKind::File, id.raw()))
            }
        }
    }

    fn request_shutdown(&self) {
        if self.shared.shutdown_requested.swap(true, Ordering::SeqCst) {
            debug!("Shutdown was already requested");
            return;
        }
        if let Err(err) = self.host_call("request_shutdown", |host| host.request_shutdown()) {
            error!("Could not request a shutdown from the host. {err}");
        }
    }
}

impl<H: PortHost> CorePort for PortAdapters<'_, H> {
    //--------------------------------------------   Connections   -----------------------------------------------

    fn open_connection(&mut self, id: ConnectionId, ip: Ipv4Addr, port: u16, via_relay: bool) -> Result<(), PortError> {
        self.shared.registry.track_connection(id, ConnectionEntry::new(TransportState::Connecting, port, via_relay));
        info!("Connecting {id} to {ip}:{port}{}", if via_relay { " (relay session)" } else { "" });
        self.host_call("connect", |host| host.connect(id, ip, port))
    }

    fn open_connection_dns(
        &mut self,
        id: ConnectionId,
        host: &str,
        port: u16,
        via_relay: bool,
    ) -> Result<ResolveId, PortError> {
        self.shared.registry.track_connection(id, ConnectionEntry::new(TransportState::Resolving, port, via_relay));
        self.resolve(Endpoint::Connection(id), host).inspect_err(|_| {
            self.shared.registry.release_connection(id);
        })
    }

    fn close_connection(&mut self, id: ConnectionId) -> Result<(), PortError> {
        match self.shared.registry.begin_connection_close(id) {
            None => {
                warn!("close_connection: {id} is unknown");
                Err(PortError::unknown(HandleKind::Connection, id.raw()))
            }
            Some(CloseTransition::AlreadyClosing) => {
                debug!("{id} is already closing");
                Ok(())
            }
            Some(CloseTransition::Started) => {
                if !self.shared.resolver.withdraw(Endpoint::Connection(id)).is_empty() {
                    // Still resolving, so the host has no socket for it.
                    debug!("{id} closed before its name was resolved");
                    self.shared.defer(Inbound::ConnectionSignal { id: id.raw(), code: TcpSignal::DISCONNECTED });
                    return Ok(());
                }
                info!("Closing {id}");
                self.host_call("close_connection", |host| host.close_connection(id))
            }
        }
    }

    fn send(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, PortError> {
        if data.is_empty() {
            return Err(PortError::invalid_input("Refusing to send an empty buffer"));
        }
        if self.shared.registry.connection(id).is_none() {
            warn!("send: {id} is unknown. Dropping {} bytes", data.len());
            return Err(PortError::unknown(HandleKind::Connection, id.raw()));
        }
        let sent = self.host_call("send_data", |host| host.send_data(id, data))?;
        if sent != data.len() {
            warn!("{id}: short write. The host sent {sent} of {} bytes", data.len());
        }
        Ok(sent)
    }

    //----------------------------------------   Relay control channel   -----------------------------------------

    fn relay_open(&mut self, relay: RelayKey, host: &str, port: u16) -> Result<(), PortError> {
        if host.is_empty() {
            return Err(PortError::invalid_input("Relay host is empty"));
        }
        self.shared.registry.track_relay(relay, host, port, self.shared.config.max_relays).inspect_err(|err| {
            warn!("Cannot open {relay} to {host}:{port}. {err}");
        })?;
        match parse_ipv4_literal(host) {
            Some(ip) => self.relay_open_resolved(relay, ip),
            None => self.resolve(Endpoint::Relay(relay), host).map(|_| ()).inspect_err(|_| {
                self.shared.registry.release_relay(relay);
            }),
        }
    }

    fn relay_open_resolved(&mut self, relay: RelayKey, ip: Ipv4Addr) -> Result<(), PortError> {
        let Some(entry) = self.shared.registry.relay(relay) else {
            warn!("relay_open_resolved: {relay} is unknown");
            return Err(PortError::unknown(HandleKind::Relay, relay.raw()));
        };
        if !matches!(entry.state, RelayState::Idle | RelayState::Resolving) {
            warn!("{relay} cannot connect while {:?}", entry.state);
            return Err(PortError::invalid_state(format!("{relay} is {:?}", entry.state)));
        }
        self.shared.registry.set_relay_state(relay, RelayState::Connecting);
        info!("Opening the control channel of {relay} to {ip}:{}", entry.port);
        let socket = self.host_call("relay_connect", |host| host.relay_connect(ip, entry.port))?;
        self.shared.registry.attach_relay_socket(relay, socket);
        debug!("{relay} is using {socket}");
        Ok(())
    }

    fn relay_send(&mut self, relay: RelayKey, data: &[u8]) -> Result<usize, PortError> {
        if data.is_empty() {
            return Err(PortError::invalid_input("Refusing to send an empty buffer"));
        }
        let Some(entry) = self.shared.registry.relay(relay) else {
            warn!("relay_send: {relay} is unknown. Dropping {} bytes", data.len());
            return Err(PortError::unknown(HandleKind::Relay, relay.raw()));
        };
        let Some(socket) = entry.socket else {
            warn!("relay_send: {relay} has no control channel. Dropping {} bytes", data.len());
            return Err(PortError::invalid_state(format!("{relay} has no control channel")));
        };
        let sent = self.host_call("relay_send", |host| host.relay_send(socket, data))?;
        if sent != data.len() {
            warn!("{relay}: short write. The host sent {sent} of {} bytes", data.len());
        }
        Ok(sent)
    }

    fn relay_close(&mut self, relay: RelayKey) -> Result<(), PortError> {
        match self.shared.registry.begin_relay_close(relay) {
            None => {
                warn!("relay_close: {relay} is unknown");
                Err(PortError::unknown(HandleKind::Relay, relay.raw()))
            }
            Some((CloseTransition::AlreadyClosing, _)) => {
                debug!("{relay} is already closing");
                Ok(())
            }
            Some((CloseTransition::Started, Some(socket))) => {
                info!("Closing the control channel of {relay}");
                self.host_call("relay_close", |host| host.relay_close(socket))
            }
            Some((CloseTransition::Started, None)) => {
                self.shared.resolver.withdraw(Endpoint::Relay(relay));
                self.shared.registry.release_relay(relay);
                debug!("{relay} closed before the host connected it");
                Ok(())
            }
        }
    }

    //--------------------------------------   Name resolution & discovery   -------------------------------------

    fn resolve(&mut self, target: Endpoint, qname: &str) -> Result<ResolveId, PortError> {
        let known = match target {
            Endpoint::Connection(id) => {
                self.shared.registry.set_connection_state(id, TransportState::Resolving).is_some()
            }
            Endpoint::Relay(key) => self.shared.registry.set_relay_state(key, RelayState::Resolving).is_some(),
        };
        if !known {
            warn!("resolve: {target} is unknown");
            return Err(match target {
                Endpoint::Connection(id) => PortError::unknown(HandleKind::Connection, id.raw()),
                Endpoint::Relay(key) => PortError::unknown(HandleKind::Relay, key.raw()),
            });
        }
        let enqueued = self.shared.resolver.enqueue(&self.shared.monitor, target, qname)?;
        if !enqueued.started {
            self.shared.defer(Inbound::ResolutionCompleted { id: enqueued.id, address: None });
        }
        Ok(enqueued.id)
    }

    fn advertise(&mut self, payload: &[u8]) -> Result<(), PortError> {
        if payload.is_empty() {
            return Err(PortError::invalid_input("Refusing to broadcast an empty advertisement"));
        }
        match self.host_call("broadcast_discovery", |host| host.broadcast_discovery(payload)) {
            Err(PortError::Unavailable) => Err(PortError::Unavailable),
            _ => Ok(()),
        }
    }

    fn local_ip(&mut self) -> Result<Option<String>, PortError> {
        let ip = self.host_call("local_ip", |host| host.local_ip())?;
        let ip = ip.trim();
        if ip.is_empty() {
            debug!("The host has no local address");
            return Ok(None);
        }
        Ok(Some(ip.to_string()))
    }

    fn server_port(&self) -> u16 {
        self.shared.config.server_port
    }

    //-----------------------------------------------   Files   -------------------------------------------------

    fn file_open(&mut self, name: &str) -> Result<FileId, PortError> {
        self.check_filename(name)?;
        let id = self.host_call("open_file", |host| host.open_file(name))?;
        self.shared.registry.track_file(id, name);
        trace!("Opened {name} as {id}");
        Ok(id)
    }

    fn file_close(&mut self, id: FileId) -> Result<(), PortError> {
        self.check_file(id)?;
        let result = self.host_call("close_file", |host| host.close_file(id));
        self.shared.registry.release_file(id);
        result
    }

    fn file_read(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, PortError> {
        self.check_file(id)?;
        self.host_call("read_file", |host| host.read_file(id, buf))
    }

    fn file_write(&mut self, id: FileId, data: &[u8]) -> Result<usize, PortError> {
        self.check_file(id)?;
        let written = self.host_call("write_file", |host| host.write_file(id, data))?;
        if written != data.len() {
            warn!("{id}: short write. The host wrote {written} of {} bytes", data.len());
        }
        Ok(written)
    }

    fn file_seek(&mut self, id: FileId, pos: SeekFrom) -> Result<u64, PortError> {
        self.check_file(id)?;
        self.host_call("seek_file", |host| host.seek_file(id, pos))
    }

    fn file_rename(&mut self, old_name: &str, new_name: &str) -> Result<(), PortError> {
        self.check_filename(old_name)?;
        self.check_filename(new_name)?;
        self.host_call("rename_file", |host| host.rename_file(old_name, new_name))
    }

    fn file_remove(&mut self, name: &str) -> Result<(), PortError> {
        self.check_filename(name)?;
        self.host_call("remove_file", |host| host.remove_file(name))
    }

    //--------------------------------------------   Applications   ----------------------------------------------

    fn deliver_to_app(&mut self, wsid: &Wsid, payload: &[u8]) -> Result<(), PortError> {
        let config = &self.shared.config;
        let fatal = config.detect_fatal_rpc_errors && inspector::is_fatal_frame(payload, config.fatal_rpc_error_code);
        let delivered = self.host_call("deliver_to_app", |host| host.deliver_to_app(wsid, payload));
        if fatal {
            error!(
                "The core sent a fatal RPC error (code {}) to {wsid}. Requesting shutdown.",
                config.fatal_rpc_error_code
            );
            self.request_shutdown();
        }
        delivered
    }
}
