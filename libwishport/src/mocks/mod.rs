mod mock_core;
mod recording_host;

pub use mock_core::{CoreProbe, CoreRecord, MockCore, MockEvent};
pub use recording_host::{CloseHook, HostCall, HostProbe, HostState, RecordingHost};
