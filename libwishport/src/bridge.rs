//! The bridge between a host platform and the network core.
//!
//! A [`WishBridge`] owns the core, the host object and every table that correlates the two. Host threads call the
//! entry points in any number; each entry point takes exclusive access to the core, applies its work, and drains
//! the core's events to exhaustion before returning, even when its own work failed.
//!
//! While a thread owns the core it may call into the host, and a host may call straight back into the bridge on
//! the same thread (e.g. signalling a disconnect from inside `close_connection`). Such re-entrant calls are queued
//! and applied by the drain that is already running, before it returns.
//!
//! Locks are always taken in the order core, then registry or resolver table, then monitor. The registry and
//! resolver locks are never held across a host call. Callers outside a drain reach the adapters through a
//! [`PortSession`], which holds the core like any entry point.

use crate::adapters::PortAdapters;
use crate::config::BridgeConfig;
use crate::drain::drain_events;
use crate::error::{BridgeError, ConfigError, PortError};
use crate::handles::{ConnectionId, HandleKind, ResolveId, TransportState, Wsid};
use crate::helpers::{ipv4_from_bytes, lock_or_recover};
use crate::host::PortHost;
use crate::inbound::{self, Inbound};
use crate::monitor::Monitor;
use crate::network_core::NetworkCore;
use crate::port::CorePort;
use crate::registry::{ConnectionEntry, HandleRegistry};
use crate::resolver::DnsCorrelator;
use log::*;
use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::ThreadId;

/// State shared between the entry points and the outbound adapters.
pub(crate) struct BridgeShared<H> {
    pub(crate) config: BridgeConfig,
    pub(crate) registry: HandleRegistry,
    pub(crate) resolver: DnsCorrelator,
    pub(crate) monitor: Monitor<H>,
    pub(crate) shutdown_requested: AtomicBool,
    deferred: Mutex<VecDeque<Inbound>>,
    detached: AtomicBool,
}

impl<H> BridgeShared<H> {
    /// Queue work for the core, to be applied by the running drain or else by the next entry point.
    pub(crate) fn defer(&self, inbound: Inbound) {
        debug!("Deferring {inbound}");
        lock_or_recover(&self.deferred, "deferred queue").push_back(inbound);
    }

    fn pop_deferred(&self) -> Option<Inbound> {
        lock_or_recover(&self.deferred, "deferred queue").pop_front()
    }
}

/// Marks the thread that owns the core for as long as it is alive.
struct CoreOwner<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<'a> CoreOwner<'a> {
    fn claim(owner: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock_or_recover(owner, "core owner") = Some(std::thread::current().id());
        Self { owner }
    }
}

impl Drop for CoreOwner<'_> {
    fn drop(&mut self) {
        *lock_or_recover(self.owner, "core owner") = None;
    }
}

pub struct WishBridge<C, H> {
    core: Mutex<C>,
    core_owner: Mutex<Option<ThreadId>>,
    shared: BridgeShared<H>,
}

impl<C: NetworkCore, H: PortHost> WishBridge<C, H> {
    pub fn new(config: BridgeConfig, core: C, host: H) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Wish port layer ready. Server port {}, up to {} relay control channel(s)",
            config.server_port, config.max_relays
        );
        let shared = BridgeShared {
            config,
            registry: HandleRegistry::new(),
            resolver: DnsCorrelator::new(),
            monitor: Monitor::new("host boundary", host),
            shutdown_requested: AtomicBool::new(false),
            deferred: Mutex::new(VecDeque::new()),
            detached: AtomicBool::new(false),
        };
        Ok(Self { core: Mutex::new(core), core_owner: Mutex::new(None), shared })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    pub fn resolver(&self) -> &DnsCorrelator {
        &self.shared.resolver
    }

    pub fn monitor(&self) -> &Monitor<H> {
        &self.shared.monitor
    }

    /// The outbound adapters, for callers that reach the host outside of a drain.
    ///
    /// The session holds the core for as long as it lives, and drains it when dropped, so work the adapters defer
    /// is applied before the session ends. Fails with [`BridgeError::Reentrant`] on a thread that already holds the
    /// core.
    pub fn port(&self) -> Result<PortSession<'_, C, H>, BridgeError> {
        if self.holds_core() {
            return Err(BridgeError::Reentrant);
        }
        let core = lock_or_recover(&self.core, "network core");
        let owner = CoreOwner::claim(&self.core_owner);
        Ok(PortSession { _owner: owner, core, adapters: PortAdapters::new(&self.shared), bridge: self })
    }

    /// True once a fatal RPC error has led to a shutdown request.
    pub fn shutdown_requested(&self) -> bool {
        self.shared.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Take the host object out of the bridge. Adapters degrade to [`PortError::Unavailable`] and entry points to
    /// [`BridgeError::ShutDown`] from here on.
    ///
    /// A host may call this from inside one of its own calls. It then gets `None`, and the host object is dropped
    /// once that call returns.
    pub fn detach_host(&self) -> Option<H> {
        self.shared.detached.store(true, Ordering::SeqCst);
        self.shared.monitor.detach()
    }

    //-------------------------------------------   Host entry points   ---------------------------------------------

    /// The host received bytes on connection `id`.
    pub fn feed_data(&self, id: i32, data: &[u8]) -> Result<(), BridgeError> {
        self.submit(Inbound::ConnectionData { id, data: data.to_vec() })
    }

    /// A connection changed state. `code` is one of the [`crate::handles::TcpSignal`] codes.
    pub fn signal_event(&self, id: i32, code: i32) -> Result<(), BridgeError> {
        self.submit(Inbound::ConnectionSignal { id, code })
    }

    /// A local discovery datagram arrived from `ip`:`port`. The address must be exactly 4 bytes.
    pub fn feed_local_discovery(&self, ip: &[u8], port: u16, payload: &[u8]) -> Result<(), BridgeError> {
        let Some(ip) = ipv4_from_bytes(ip) else {
            warn!("feed_local_discovery: expected a 4 byte address, got {} bytes", ip.len());
            return Err(PortError::invalid_input("Discovery source address must be 4 bytes").into());
        };
        self.submit(Inbound::LocalDiscovery { from: SocketAddrV4::new(ip, port), payload: payload.to_vec() })
    }

    /// The relay control channel `id` changed state. `code` is one of the [`crate::handles::RelaySignal`] codes.
    pub fn relay_control_signal(&self, id: i32, code: i32) -> Result<(), BridgeError> {
        self.submit(Inbound::RelaySignal { id, code })
    }

    pub fn relay_control_feed(&self, id: i32, data: &[u8]) -> Result<(), BridgeError> {
        self.submit(Inbound::RelayData { id, data: data.to_vec() })
    }

    /// The host finished resolving for `resolve_id`. An empty `ip` means the resolution failed.
    pub fn dns_resolving_completed(&self, resolve_id: i32, ip: &[u8]) -> Result<(), BridgeError> {
        let address = ipv4_from_bytes(ip);
        if address.is_none() && !ip.is_empty() {
            warn!("resolve#{resolve_id}: the host delivered a {} byte address. Treating it as a failure", ip.len());
        }
        self.submit(Inbound::ResolutionCompleted { id: ResolveId(resolve_id), address })
    }

    pub fn app_to_core(&self, wsid: &[u8], payload: &[u8]) -> Result<(), BridgeError> {
        let wsid = parse_wsid("app_to_core", wsid)?;
        self.submit(Inbound::AppToCore { wsid, payload: payload.to_vec() })
    }

    pub fn remove_service(&self, wsid: &[u8]) -> Result<(), BridgeError> {
        let wsid = parse_wsid("remove_service", wsid)?;
        self.submit(Inbound::RemoveService { wsid })
    }

    /// One timebase period has elapsed.
    pub fn report_periodic(&self) -> Result<(), BridgeError> {
        self.submit(Inbound::Periodic)
    }

    /// Drain the core without feeding it anything.
    pub fn process_connections(&self) -> Result<(), BridgeError> {
        self.check_attached()?;
        if self.holds_core() {
            trace!("process_connections: the running drain will pick up any new events");
            return Ok(());
        }
        self.with_core(|_, _, _| Ok(()))
    }

    /// The host accepted a socket on the server port. Returns the connection id the core allocated for it.
    pub fn accept_server_connection(&self) -> Result<ConnectionId, BridgeError> {
        self.check_attached()?;
        if self.holds_core() {
            return Err(BridgeError::Reentrant);
        }
        self.with_core(|core, shared, _| {
            let id = core.accept_connection().ok_or_else(|| {
                warn!("The core has no free connection slot for an incoming connection");
                PortError::invalid_state("No free connection slot")
            })?;
            shared.registry.track_connection(id, ConnectionEntry::new(TransportState::Connecting, 0, false));
            info!("Accepted an incoming connection as {id}");
            Ok(id)
        })
    }

    pub fn rx_buffer_free(&self, id: i32) -> Result<usize, BridgeError> {
        self.check_attached()?;
        if self.holds_core() {
            return Err(BridgeError::Reentrant);
        }
        let core = lock_or_recover(&self.core, "network core");
        core.rx_buffer_free(ConnectionId(id)).ok_or_else(|| {
            debug!("rx_buffer_free: conn#{id} is unknown");
            PortError::unknown(HandleKind::Connection, id).into()
        })
    }

    /// An unknown connection, or a detached host, counts as empty, so that a host reader waiting on a dead
    /// connection moves on. A call from inside a host call on the draining thread cannot read the core and fails
    /// with [`BridgeError::Reentrant`].
    pub fn is_rx_buffer_empty(&self, id: i32) -> Result<bool, BridgeError> {
        match self.rx_buffer_free(id) {
            Ok(free) => Ok(free >= self.shared.config.rx_buffer_size),
            Err(BridgeError::Reentrant) => Err(BridgeError::Reentrant),
            Err(_) => Ok(true),
        }
    }

    //----------------------------------------------   Internals   --------------------------------------------------

    fn check_attached(&self) -> Result<(), BridgeError> {
        if self.shared.detached.load(Ordering::SeqCst) {
            warn!("The host has been detached. Ignoring the call");
            return Err(BridgeError::ShutDown);
        }
        Ok(())
    }

    fn holds_core(&self) -> bool {
        *lock_or_recover(&self.core_owner, "core owner") == Some(std::thread::current().id())
    }

    fn submit(&self, inbound: Inbound) -> Result<(), BridgeError> {
        self.check_attached()?;
        if self.holds_core() {
            self.shared.defer(inbound);
            return Ok(());
        }
        self.with_core(|core, shared, port| inbound::apply(shared, core, port, inbound))
    }

    /// Run `f` with exclusive access to the core, then drain it. The drain runs whatever `f` returned.
    fn with_core<R>(
        &self,
        f: impl FnOnce(&mut C, &BridgeShared<H>, &mut dyn CorePort) -> Result<R, PortError>,
    ) -> Result<R, BridgeError> {
        let mut guard = lock_or_recover(&self.core, "network core");
        let _owner = CoreOwner::claim(&self.core_owner);
        let core = &mut *guard;
        let mut port = PortAdapters::new(&self.shared);
        let result = f(&mut *core, &self.shared, &mut port);
        self.drain_to_exhaustion(core, &mut port);
        result.map_err(BridgeError::from)
    }

    fn drain_to_exhaustion(&self, core: &mut C, port: &mut dyn CorePort) {
        loop {
            drain_events(core, port);
            let Some(next) = self.shared.pop_deferred() else {
                break;
            };
            if let Err(err) = inbound::apply(&self.shared, core, port, next) {
                debug!("Deferred work failed. {err}");
            }
        }
    }
}

/// Exclusive access to the outbound adapters, returned by [`WishBridge::port`].
///
/// Derefs to [`PortAdapters`], so every [`CorePort`] operation is available on it.
pub struct PortSession<'a, C: NetworkCore, H: PortHost> {
    // Dropped before `core`: the owner mark is cleared while the core is still locked.
    _owner: CoreOwner<'a>,
    core: MutexGuard<'a, C>,
    adapters: PortAdapters<'a, H>,
    bridge: &'a WishBridge<C, H>,
}

impl<'a, C: NetworkCore, H: PortHost> Deref for PortSession<'a, C, H> {
    type Target = PortAdapters<'a, H>;

    fn deref(&self) -> &Self::Target {
        &self.adapters
    }
}

impl<C: NetworkCore, H: PortHost> DerefMut for PortSession<'_, C, H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.adapters
    }
}

impl<C: NetworkCore, H: PortHost> Drop for PortSession<'_, C, H> {
    fn drop(&mut self) {
        let core = &mut *self.core;
        self.bridge.drain_to_exhaustion(core, &mut self.adapters);
    }
}

fn parse_wsid(call: &str, bytes: &[u8]) -> Result<Wsid, BridgeError> {
    Wsid::from_slice(bytes).ok_or_else(|| {
        warn!("{call}: a service id must be 32 bytes, got {}", bytes.len());
        PortError::invalid_input("Service id must be 32 bytes").into()
    })
}
