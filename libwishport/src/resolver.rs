//! Correlates asynchronous host name resolutions with the connection or relay that is waiting for them.
//!
//! A resolution is started from somewhere inside the core's callstack and completes later, possibly on another
//! thread. The correlator hands out a [`ResolveId`] per request and keeps one [`PendingResolution`] per id until the
//! first completion for that id takes it. Later completions with the same id find nothing and are ignored.

use crate::error::PortError;
use crate::handles::ResolveId;
use crate::helpers::lock_or_recover;
use crate::host::{BoundaryContext, ResolverHost};
use crate::monitor::Monitor;
use crate::network_core::Endpoint;
use log::*;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingResolution {
    pub id: ResolveId,
    pub target: Endpoint,
    pub qname: String,
}

/// The outcome of [`DnsCorrelator::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Enqueued {
    pub id: ResolveId,
    /// False if the host refused to start resolving. The record stays pending so that the caller can complete it
    /// as failed through the usual path.
    pub started: bool,
}

#[derive(Default)]
struct PendingTable {
    next_id: i32,
    pending: HashMap<ResolveId, PendingResolution>,
}

impl PendingTable {
    fn allocate(&mut self) -> ResolveId {
        loop {
            let id = ResolveId(self.next_id);
            self.next_id = self.next_id.checked_add(1).unwrap_or(0);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

#[derive(Default)]
pub struct DnsCorrelator {
    table: Mutex<PendingTable>,
}

impl DnsCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut PendingTable) -> R) -> R {
        let mut table = lock_or_recover(&self.table, "resolver table");
        f(&mut table)
    }

    /// Record a resolution for `target` without starting it.
    pub fn register(&self, target: Endpoint, qname: &str) -> ResolveId {
        self.with_table(|t| {
            let id = t.allocate();
            t.pending.insert(id, PendingResolution { id, target, qname: qname.to_string() });
            id
        })
    }

    /// Record a resolution for `target` and ask the host to start it.
    ///
    /// The table lock is released before the host is called. If the host cannot be reached at all the record is
    /// withdrawn again and [`PortError::Unavailable`] returned.
    pub fn enqueue<H>(&self, monitor: &Monitor<H>, target: Endpoint, qname: &str) -> Result<Enqueued, PortError>
    where
        H: ResolverHost + BoundaryContext,
    {
        if qname.is_empty() {
            return Err(PortError::invalid_input("Cannot resolve an empty host name"));
        }
        let id = self.register(target, qname);
        debug!("Resolving {qname} for {target} as {id}");
        match monitor.with("start_resolving", |host| host.start_resolving(qname, id)) {
            Ok(Ok(())) => Ok(Enqueued { id, started: true }),
            Ok(Err(err)) => {
                warn!("The host refused to resolve {qname} for {target}. {err}");
                Ok(Enqueued { id, started: false })
            }
            Err(err) => {
                self.take(id);
                Err(err)
            }
        }
    }

    /// Remove and return the record for `id`. Only the first caller gets it.
    pub fn take(&self, id: ResolveId) -> Option<PendingResolution> {
        self.with_table(|t| t.pending.remove(&id))
    }

    /// Drop every resolution that is still pending for `target`, returning their ids.
    pub fn withdraw(&self, target: Endpoint) -> Vec<ResolveId> {
        let withdrawn = self.with_table(|t| {
            let ids: Vec<ResolveId> = t.pending.values().filter(|p| p.target == target).map(|p| p.id).collect();
            for id in &ids {
                t.pending.remove(id);
            }
            ids
        });
        if !withdrawn.is_empty() {
            debug!("Withdrew {} pending resolution(s) for {target}", withdrawn.len());
        }
        withdrawn
    }

    pub fn is_pending(&self, id: ResolveId) -> bool {
        self.with_table(|t| t.pending.contains_key(&id))
    }

    pub fn pending_count(&self) -> usize {
        self.with_table(|t| t.pending.len())
    }

    #[cfg(test)]
    fn set_next_id(&self, next: i32) {
        self.with_table(|t| t.next_id = next);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::HostError;
    use crate::handles::{ConnectionId, RelayKey};

    #[derive(Default)]
    struct StubResolver {
        refuse: bool,
        started: Vec<(String, ResolveId)>,
    }

    impl BoundaryContext for StubResolver {}

    impl ResolverHost for StubResolver {
        fn start_resolving(&mut self, qname: &str, id: ResolveId) -> Result<(), HostError> {
            if self.refuse {
                return Err(HostError::Code(-2));
            }
            self.started.push((qname.to_string(), id));
            Ok(())
        }
    }

    #[test]
    fn ids_increase_and_completions_are_taken_once() {
        let correlator = DnsCorrelator::new();
        let conn = Endpoint::Connection(ConnectionId(1));
        let relay = Endpoint::Relay(RelayKey(0));
        let first = correlator.register(conn, "a.example.com");
        let second = correlator.register(relay, "b.example.com");
        assert!(second.raw() > first.raw());
        assert_eq!(correlator.pending_count(), 2);

        let record = correlator.take(second).expect("second is pending");
        assert_eq!(record.target, relay);
        assert_eq!(record.qname, "b.example.com");
        assert!(correlator.take(second).is_none());
        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.is_pending(first));
    }

    #[test]
    fn ids_wrap_and_skip_pending_ones() {
        let correlator = DnsCorrelator::new();
        let target = Endpoint::Connection(ConnectionId(1));
        let zero = correlator.register(target, "zero.example.com");
        assert_eq!(zero, ResolveId(0));
        correlator.set_next_id(i32::MAX);
        assert_eq!(correlator.register(target, "max.example.com"), ResolveId(i32::MAX));
        // 0 is still pending, so the counter moves on to 1
        assert_eq!(correlator.register(target, "one.example.com"), ResolveId(1));
    }

    #[test]
    fn withdraw_only_touches_the_target() {
        let correlator = DnsCorrelator::new();
        let a = Endpoint::Connection(ConnectionId(1));
        let b = Endpoint::Connection(ConnectionId(2));
        let id_a = correlator.register(a, "a.example.com");
        let id_b = correlator.register(b, "b.example.com");
        assert_eq!(correlator.withdraw(a), vec![id_a]);
        assert!(!correlator.is_pending(id_a));
        assert!(correlator.is_pending(id_b));
        assert!(correlator.withdraw(a).is_empty());
    }

    #[test]
    fn enqueue_starts_host_resolution() {
        let correlator = DnsCorrelator::new();
        let monitor = Monitor::new("resolver", StubResolver::default());
        let target = Endpoint::Relay(RelayKey(0));
        let enqueued = correlator.enqueue(&monitor, target, "relay.example.com").expect("host is attached");
        assert!(enqueued.started);
        assert!(correlator.is_pending(enqueued.id));
        let host = monitor.detach().expect("host was attached");
        assert_eq!(host.started, vec![("relay.example.com".to_string(), enqueued.id)]);
    }

    #[test]
    fn refused_resolution_stays_pending() {
        let correlator = DnsCorrelator::new();
        let monitor = Monitor::new("resolver", StubResolver { refuse: true, ..Default::default() });
        let target = Endpoint::Connection(ConnectionId(5));
        let enqueued = correlator.enqueue(&monitor, target, "nowhere.example.com").expect("host is attached");
        assert!(!enqueued.started);
        assert!(correlator.is_pending(enqueued.id));
    }

    #[test]
    fn unavailable_host_leaves_nothing_pending() {
        let correlator = DnsCorrelator::new();
        let monitor = Monitor::new("resolver", StubResolver::default());
        monitor.detach();
        let target = Endpoint::Connection(ConnectionId(5));
        let err = correlator.enqueue(&monitor, target, "relay.example.com").unwrap_err();
        assert_eq!(err, PortError::Unavailable);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn empty_names_are_rejected() {
        let correlator = DnsCorrelator::new();
        let monitor = Monitor::new("resolver", StubResolver::default());
        let err = correlator.enqueue(&monitor, Endpoint::Relay(RelayKey(0)), "").unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
        assert_eq!(correlator.pending_count(), 0);
    }
}
