//! Error handling for the command/transport engine.
//!
//! One crate-wide error enum with a small taxonomy: configuration errors are
//! fatal at construction time, communication errors surface to the immediate
//! caller, and the timeout variants carry enough context for the caller to
//! decide between retrying, degrading, or aborting.

use std::time::Duration;

use thiserror::Error;

/// Command link error type.
#[derive(Error, Debug, Clone)]
pub enum CmdLinkError {
    /// Invalid configuration (bad port/address, malformed config file).
    /// Raised at construction, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Read/write failure on an open connection (broken pipe, device
    /// unplugged, socket closed). Surfaced to the immediate caller; the
    /// engine does not auto-reconnect.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Malformed payload or serialization failure.
    #[error("Data error: {0}")]
    Data(String),

    /// Operation attempted in an invalid lifecycle state (e.g. sending on an
    /// unbound device).
    #[error("State error: {0}")]
    State(String),

    /// A device did not answer a request within the tracked variable's
    /// timeout. Propagates to application code uncaught; the caller decides
    /// whether to retry.
    #[error("device \"{device}\" did not respond to \"{command}\" within {elapsed:?}")]
    ReplyTimeout {
        device: String,
        command: String,
        elapsed: Duration,
    },

    /// No candidate link answered a bonjour probe for this address.
    #[error("no device with id \"{command_id}\" answered on any link")]
    DiscoveryTimeout { command_id: String },

    /// A link's peripheral never completed the ISINIT/INIT handshake.
    #[error("link \"{link}\" did not complete the init handshake")]
    InitTimeout { link: String },

    /// The discovered device kind has no factory in the registry. Callers
    /// fall back to a blank device.
    #[error("device kind \"{kind}\" is not in the device registry")]
    UnknownDeviceKind { kind: String },
}

/// Result type alias for the command link engine.
pub type Result<T> = std::result::Result<T, CmdLinkError>;

impl CmdLinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        CmdLinkError::Config(msg.into())
    }

    pub fn communication(msg: impl Into<String>) -> Self {
        CmdLinkError::Communication(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        CmdLinkError::Data(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CmdLinkError::State(msg.into())
    }

    pub fn reply_timeout(
        device: impl Into<String>,
        command: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        CmdLinkError::ReplyTimeout {
            device: device.into(),
            command: command.into(),
            elapsed,
        }
    }

    /// Whether the error is one of the expected timeout conditions rather
    /// than a hard failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CmdLinkError::ReplyTimeout { .. }
                | CmdLinkError::DiscoveryTimeout { .. }
                | CmdLinkError::InitTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for CmdLinkError {
    fn from(err: serde_json::Error) -> Self {
        CmdLinkError::Data(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for CmdLinkError {
    fn from(err: serde_yaml::Error) -> Self {
        CmdLinkError::Data(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for CmdLinkError {
    fn from(err: figment::Error) -> Self {
        CmdLinkError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(CmdLinkError::reply_timeout("M1,", "R", Duration::from_millis(50)).is_timeout());
        assert!(CmdLinkError::DiscoveryTimeout {
            command_id: "M1".to_string()
        }
        .is_timeout());
        assert!(!CmdLinkError::config("bad port").is_timeout());
    }

    #[test]
    fn test_reply_timeout_message_carries_context() {
        let err = CmdLinkError::reply_timeout("M1,", "RM", Duration::from_millis(120));
        let msg = err.to_string();
        assert!(msg.contains("M1,"));
        assert!(msg.contains("RM"));
    }
}
