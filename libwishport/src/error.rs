use crate::handles::HandleKind;
use thiserror::Error;

/// Failure reported by a host primitive.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostError {
    /// A negative return code from the host. It is handed back to the core verbatim.
    #[error("Host returned code {0}")]
    Code(i32),
    #[error("Host call failed. {0}")]
    Failed(String),
}

impl HostError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HostError::Failed(msg.into())
    }
}

/// The result of an outbound call made by the network core through the port layer.
///
/// Nothing escapes an adapter as a panic; every failure ends up here and maps onto the integer sentinel the core
/// expects via [`PortError::code`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("The host boundary is unavailable.")]
    Unavailable,
    #[error("Unknown {kind} handle {id}.")]
    UnknownHandle { kind: HandleKind, id: i32 },
    #[error("Invalid input. {0}")]
    InvalidInput(String),
    #[error("Invalid state. {0}")]
    InvalidState(String),
    #[error("Only {0} concurrent relay control connection(s) are supported.")]
    RelayLimit(usize),
    #[error("{0}")]
    Host(#[from] HostError),
}

impl PortError {
    pub fn unknown(kind: HandleKind, id: i32) -> Self {
        PortError::UnknownHandle { kind, id }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PortError::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        PortError::InvalidState(msg.into())
    }

    /// The failure code handed to the core. Host codes pass through unchanged.
    pub fn code(&self) -> i32 {
        match self {
            PortError::Host(HostError::Code(code)) if *code < 0 => *code,
            _ => -1,
        }
    }
}

/// Failure of a host-facing entry point.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{0}")]
    Port(#[from] PortError),
    #[error("The network core is busy on this thread and the call cannot be deferred.")]
    Reentrant,
    #[error("The bridge has been detached from its host.")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration file: {0}")]
    InvalidConfig(#[from] serde_yml::Error),
    #[error("Invalid configuration value. {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_codes_propagate_verbatim() {
        assert_eq!(PortError::Host(HostError::Code(-5)).code(), -5);
        assert_eq!(PortError::Host(HostError::Code(3)).code(), -1);
        assert_eq!(PortError::Host(HostError::failed("boom")).code(), -1);
        assert_eq!(PortError::Unavailable.code(), -1);
        assert_eq!(PortError::unknown(HandleKind::File, 9).code(), -1);
    }

    #[test]
    fn messages_name_the_handle() {
        let err = PortError::unknown(HandleKind::Connection, 12);
        assert_eq!(err.to_string(), "Unknown connection handle 12.");
    }
}
