//! Tokio helpers for hosts that run on an async runtime: the core's timebase and a name resolver whose result
//! can be handed straight to [`WishBridge::dns_resolving_completed`].

use crate::bridge::WishBridge;
use crate::error::BridgeError;
use crate::host::PortHost;
use crate::network_core::NetworkCore;
use log::*;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Keeps the timebase running. Dropping the handle stops it.
pub struct TimebaseHandle {
    task: JoinHandle<()>,
}

impl TimebaseHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimebaseHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Report one timebase period to the core every `interval`, starting one interval from now.
/// Hosts normally pass [`crate::config::BridgeConfig::timebase_interval`].
///
/// Ticks run on the blocking pool, since reporting may call into the host. The timebase stops by itself once the
/// host has been detached from the bridge.
pub fn spawn_timebase<C, H>(bridge: Arc<WishBridge<C, H>>, interval: Duration) -> TimebaseHandle
where
    C: NetworkCore + 'static,
    H: PortHost + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let bridge = Arc::clone(&bridge);
            match tokio::task::spawn_blocking(move || bridge.report_periodic()).await {
                Ok(Ok(())) => trace!("Timebase tick"),
                Ok(Err(BridgeError::ShutDown)) => {
                    info!("The host was detached. Stopping the timebase");
                    break;
                }
                Ok(Err(err)) => warn!("Timebase tick failed. {err}"),
                Err(err) => {
                    error!("Timebase tick did not complete. {err}");
                    break;
                }
            }
        }
    });
    TimebaseHandle { task }
}

/// Resolve `qname` and return its first IPv4 address, or `None` if there is none.
pub async fn resolve_first_ipv4(qname: &str) -> Option<Ipv4Addr> {
    let addresses = match tokio::net::lookup_host((qname, 0)).await {
        Ok(addresses) => addresses,
        Err(err) => {
            debug!("Could not resolve {qname}. {err}");
            return None;
        }
    };
    let found = addresses
        .filter_map(|address| match address {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next();
    if found.is_none() {
        debug!("{qname} has no IPv4 address");
    }
    found
}

/// Resolve `qname` and report the outcome to the bridge as the completion of `resolve_id`.
pub async fn resolve_and_complete<C, H>(
    bridge: Arc<WishBridge<C, H>>,
    resolve_id: i32,
    qname: String,
) -> Result<(), BridgeError>
where
    C: NetworkCore + 'static,
    H: PortHost + 'static,
{
    let ip = resolve_first_ipv4(&qname).await.map(|ip| ip.octets().to_vec()).unwrap_or_default();
    match tokio::task::spawn_blocking(move || bridge.dns_resolving_completed(resolve_id, &ip)).await {
        Ok(result) => result,
        Err(err) => {
            error!("Reporting resolve#{resolve_id} did not complete. {err}");
            Err(BridgeError::ShutDown)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::mocks::{MockCore, RecordingHost};

    #[tokio::test]
    async fn literal_addresses_resolve_to_themselves() {
        assert_eq!(resolve_first_ipv4("10.0.0.5").await, Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timebase_ticks_until_the_host_is_detached() {
        env_logger::try_init().ok();
        let config = BridgeConfig { timebase_interval_ms: 10, ..Default::default() };
        let (core, core_probe) = MockCore::new(config.rx_buffer_size);
        let (host, _host_probe) = RecordingHost::new();
        let bridge = Arc::new(WishBridge::new(config, core, host).expect("config is valid"));
        let handle = spawn_timebase(Arc::clone(&bridge), bridge.config().timebase_interval());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(core_probe.periodic_ticks() >= 2);

        bridge.detach_host();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completion_reaches_the_waiting_connection() {
        use crate::handles::ConnectionId;
        use crate::mocks::{HostCall, MockEvent};

        let (core, core_probe) = MockCore::new(1024);
        let (host, host_probe) = RecordingHost::new();
        let bridge = Arc::new(WishBridge::new(BridgeConfig::default(), core, host).expect("default config is valid"));
        let conn = ConnectionId(2);
        core_probe.queue(MockEvent::OpenDns { id: conn, host: "127.0.0.1".into(), port: 37010, via_relay: false });
        bridge.process_connections().expect("host is attached");
        let resolve_id = host_probe.last_resolve_id().expect("a resolution was started");

        resolve_and_complete(Arc::clone(&bridge), resolve_id.raw(), "127.0.0.1".into()).await.expect("bridge is up");
        let connect = HostCall::Connect { id: conn, ip: Ipv4Addr::LOCALHOST, port: 37010 };
        assert!(host_probe.calls().contains(&connect));
        assert_eq!(bridge.resolver().pending_count(), 0);
    }
}
