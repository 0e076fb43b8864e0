mod reentrancy_tests;

use crate::bridge::WishBridge;
use crate::config::BridgeConfig;
use crate::handles::{ConnectionId, TcpSignal};
use crate::mocks::{CoreProbe, HostProbe, MockCore, MockEvent, RecordingHost};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub(crate) type TestBridge = WishBridge<MockCore, RecordingHost>;

pub(crate) struct Fixture {
    pub bridge: Arc<TestBridge>,
    pub core: CoreProbe,
    pub host: HostProbe,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(BridgeConfig::default(), |host| host)
}

pub(crate) fn fixture_with(config: BridgeConfig, customize: impl FnOnce(RecordingHost) -> RecordingHost) -> Fixture {
    env_logger::try_init().ok();
    let (core, core_probe) = MockCore::new(config.rx_buffer_size);
    let (host, host_probe) = RecordingHost::new();
    let bridge = WishBridge::new(config, core, customize(host)).expect("test config is valid");
    Fixture { bridge: Arc::new(bridge), core: core_probe, host: host_probe }
}

impl Fixture {
    /// Have the core open `conn` to 10.0.0.9 and the host report it connected.
    pub fn connect(&self, conn: ConnectionId, via_relay: bool) {
        let ip = Ipv4Addr::new(10, 0, 0, 9);
        self.core.queue(MockEvent::Open { id: conn, ip, port: 37010, via_relay });
        self.bridge.process_connections().expect("host is attached");
        self.bridge.signal_event(conn.raw(), TcpSignal::CONNECTED).expect("connection is known");
    }
}
