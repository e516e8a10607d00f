//! Error types for the OpenOCD RPC client

use std::time::Duration;
use thiserror::Error;

use crate::openocd_client::TargetState;

/// Errors raised by the transport, the typed accessors and the call engine
#[derive(Error, Debug)]
pub enum OcdError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by OpenOCD")]
    ConnectionClosed,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command timeout")]
    Timeout,

    #[error("Transport unusable after an earlier failure")]
    TransportBroken,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Target must be halted (current state: {state})")]
    TargetNotHalted { state: TargetState },

    #[error("At most 4 one-word arguments are accepted, got {0}")]
    TooManyArguments(usize),

    #[error("Remote call did not complete within {0:?}")]
    CallTimeout(Duration),

    #[error("Value {value} out of range for {name}")]
    ArgumentRange { name: String, value: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OcdError {
    /// True for errors that mean the socket is no longer usable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OcdError::ConnectionFailed(_)
                | OcdError::ConnectionClosed
                | OcdError::CommandFailed(_)
                | OcdError::Timeout
                | OcdError::TransportBroken
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, OcdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = OcdError::TooManyArguments(5);
        assert!(error.to_string().contains("got 5"));

        let error = OcdError::TargetNotHalted { state: TargetState::Running };
        assert!(error.to_string().contains("running"));

        let error = OcdError::ArgumentRange { name: "set_led".to_string(), value: 2 };
        assert_eq!(error.to_string(), "Value 2 out of range for set_led");
    }

    #[test]
    fn test_transport_classification() {
        assert!(OcdError::ConnectionClosed.is_transport());
        assert!(OcdError::Timeout.is_transport());
        assert!(OcdError::TransportBroken.is_transport());
        assert!(!OcdError::Parse("x".into()).is_transport());
        assert!(!OcdError::CallTimeout(Duration::from_millis(5)).is_transport());
    }
}
