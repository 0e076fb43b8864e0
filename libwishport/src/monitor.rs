//! The cross-boundary monitor.
//!
//! The host object is only reachable through [`Monitor::with`], which holds a single lock for the duration of one
//! outbound call. The monitor guards the host object against being entered by two bridge threads at once. It does
//! not guard the core (see [`crate::bridge`]) nor the registry, which have their own locks.
//!
//! Around every call the host gets a chance to attach an execution context for the calling thread. A context that
//! was attached for the call is released exactly once, whichever way the call exits.
//!
//! A host may ask for its own detachment from inside a call. The request is recorded and the host is taken out once
//! that call has returned and its context is released.

use crate::error::PortError;
use crate::helpers::lock_or_recover;
use crate::host::BoundaryContext;
use log::*;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

pub struct Monitor<H> {
    name: &'static str,
    host: Mutex<Option<H>>,
    /// The thread currently inside a host call, if any.
    owner: Mutex<Option<ThreadId>>,
    detach_requested: AtomicBool,
}

impl<H: BoundaryContext> Monitor<H> {
    pub fn new(name: &'static str, host: H) -> Self {
        Self { name, host: Mutex::new(Some(host)), owner: Mutex::new(None), detach_requested: AtomicBool::new(false) }
    }

    /// Run one outbound call against the host while holding the monitor.
    ///
    /// Blocks until the monitor is free; there is no timeout. Returns [`PortError::Unavailable`] if the host has
    /// been detached or refuses to provide an execution context.
    pub fn with<R>(&self, call: &str, f: impl FnOnce(&mut H) -> R) -> Result<R, PortError> {
        let mut guard = lock_or_recover(&self.host, self.name);
        let Some(host) = guard.as_mut() else {
            warn!("{call}: the host is not attached to the {} monitor. Dropping the call.", self.name);
            return Err(PortError::Unavailable);
        };
        let result = {
            let _owner = OwnerMark::claim(&self.owner);
            let mut scope = ContextScope::enter(host).map_err(|err| {
                warn!("{call}: could not obtain a host execution context. {err}");
                PortError::Unavailable
            })?;
            trace!("{call}: entered the {} monitor", self.name);
            f(&mut scope)
        };
        if self.detach_requested.swap(false, Ordering::SeqCst) && guard.take().is_some() {
            info!("Host detached from the {} monitor after {call} returned", self.name);
        }
        Ok(result)
    }

    pub fn is_attached(&self) -> bool {
        if self.is_owner() {
            return !self.detach_requested.load(Ordering::SeqCst);
        }
        lock_or_recover(&self.host, self.name).is_some()
    }

    /// Take the host object out of the monitor. Every later call degrades to [`PortError::Unavailable`].
    ///
    /// Called from inside a host call on the same thread, the host cannot be handed back: it is dropped as soon as
    /// that call returns, and `None` is returned here.
    pub fn detach(&self) -> Option<H> {
        if self.is_owner() {
            info!("Detach of the {} monitor requested from inside a host call. Deferring it", self.name);
            self.detach_requested.store(true, Ordering::SeqCst);
            return None;
        }
        let host = lock_or_recover(&self.host, self.name).take();
        if host.is_some() {
            info!("Host detached from the {} monitor", self.name);
        }
        host
    }

    fn is_owner(&self) -> bool {
        *lock_or_recover(&self.owner, "monitor owner") == Some(std::thread::current().id())
    }
}

/// Marks the calling thread as inside a host call for as long as it is alive.
struct OwnerMark<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<'a> OwnerMark<'a> {
    fn claim(owner: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock_or_recover(owner, "monitor owner") = Some(std::thread::current().id());
        Self { owner }
    }
}

impl Drop for OwnerMark<'_> {
    fn drop(&mut self) {
        *lock_or_recover(self.owner, "monitor owner") = None;
    }
}

struct ContextScope<'a, H: BoundaryContext> {
    host: &'a mut H,
    attached: bool,
}

impl<'a, H: BoundaryContext> ContextScope<'a, H> {
    fn enter(host: &'a mut H) -> Result<Self, crate::error::HostError> {
        let attached = host.attach_context()?;
        Ok(Self { host, attached })
    }
}

impl<H: BoundaryContext> Deref for ContextScope<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: BoundaryContext> DerefMut for ContextScope<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: BoundaryContext> Drop for ContextScope<'_, H> {
    fn drop(&mut self) {
        if self.attached {
            self.host.detach_context();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::HostError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        attach_result: Option<HostError>,
        attached: usize,
        detached: usize,
    }

    impl BoundaryContext for CountingHost {
        fn attach_context(&mut self) -> Result<bool, HostError> {
            if let Some(err) = self.attach_result.clone() {
                return Err(err);
            }
            self.attached += 1;
            Ok(true)
        }

        fn detach_context(&mut self) {
            self.detached += 1;
        }
    }

    #[test]
    fn context_is_released_once_per_call() {
        let monitor = Monitor::new("test", CountingHost::default());
        assert_eq!(monitor.with("one", |_| 1), Ok(1));
        assert_eq!(monitor.with("two", |_| 2), Ok(2));
        let host = monitor.detach().expect("host was attached");
        assert_eq!(host.attached, 2);
        assert_eq!(host.detached, 2);
    }

    #[test]
    fn context_is_released_when_the_call_panics() {
        let monitor = Arc::new(Monitor::new("test", CountingHost::default()));
        let clone = Arc::clone(&monitor);
        let result = std::thread::spawn(move || clone.with("boom", |_| panic!("host threw"))).join();
        assert!(result.is_err());
        // The monitor survives the poisoned lock.
        assert_eq!(monitor.with("after", |_| ()), Ok(()));
        let host = monitor.detach().expect("host was attached");
        assert_eq!(host.attached, 2);
        assert_eq!(host.detached, 2);
    }

    #[test]
    fn refused_context_is_unavailable() {
        let host = CountingHost { attach_result: Some(HostError::failed("no vm")), ..Default::default() };
        let monitor = Monitor::new("test", host);
        let mut called = false;
        assert_eq!(monitor.with("refused", |_| called = true), Err(PortError::Unavailable));
        assert!(!called);
    }

    #[test]
    fn detached_host_is_unavailable() {
        let monitor = Monitor::new("test", CountingHost::default());
        assert!(monitor.is_attached());
        assert!(monitor.detach().is_some());
        assert!(!monitor.is_attached());
        assert!(monitor.detach().is_none());
        assert_eq!(monitor.with("late", |_| ()), Err(PortError::Unavailable));
    }

    #[test]
    fn host_can_detach_itself_from_inside_a_call() {
        let monitor = Monitor::new("test", CountingHost::default());
        let inside = monitor.with("teardown", |_| {
            let detached = monitor.detach();
            (detached.is_none(), monitor.is_attached())
        });
        assert_eq!(inside, Ok((true, false)));
        assert!(!monitor.is_attached());
        assert_eq!(monitor.with("late", |_| ()), Err(PortError::Unavailable));
        assert!(monitor.detach().is_none());
    }

    #[test]
    fn calls_are_mutually_exclusive() {
        let monitor = Arc::new(Monitor::new("test", CountingHost::default()));
        let inside = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        monitor
                            .with("exclusive", |_| {
                                if inside.swap(true, Ordering::SeqCst) {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                std::thread::sleep(Duration::from_micros(50));
                                inside.store(false, Ordering::SeqCst);
                            })
                            .expect("host is attached");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker to finish");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
