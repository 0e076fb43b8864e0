use crate::network_core::NetworkCore;
use crate::port::CorePort;
use log::*;

/// Dispatch pending core events until the core reports none. Returns the number of events dispatched.
///
/// Dispatching may call back into the host through `port`, and may queue further events; those are drained too.
/// Must be run while holding exclusive access to the core.
pub fn drain_events<C: NetworkCore + ?Sized>(core: &mut C, port: &mut dyn CorePort) -> usize {
    let mut dispatched = 0;
    while let Some(event) = core.next_pending_event() {
        core.dispatch(event, port);
        dispatched += 1;
    }
    if dispatched > 0 {
        trace!("Drained {dispatched} core event(s)");
    }
    dispatched
}
