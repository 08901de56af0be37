//! DoIP client errors

use thiserror::Error;
use vmg_core::VmgError;

/// Errors raised by the DoIP/UDS client
#[derive(Debug, Error)]
pub enum DoipError {
    /// TCP connect failed or was refused
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A receive deadline expired
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// Peer closed the connection mid-message
    #[error("Connection closed by peer")]
    ClosedByPeer,

    /// Socket-level read/write failure
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed DoIP frame or unexpected payload type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// UDS negative response from the gateway
    #[error("UDS negative response: service 0x{service:02X}, NRC 0x{code:02X}")]
    Uds { service: u8, code: u8 },

    /// Diagnostic operation attempted outside the ACTIVE state
    #[error("Client not active (routing not activated)")]
    NotActive,

    /// Transfer cancelled by external request
    #[error("Cancelled")]
    Cancelled,
}

impl From<DoipError> for VmgError {
    fn from(err: DoipError) -> Self {
        match err {
            DoipError::Io(e) => VmgError::Io(e),
            DoipError::Timeout(what) => VmgError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timeout waiting for {}", what),
            )),
            DoipError::ClosedByPeer => VmgError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            DoipError::Connect(msg) => VmgError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                msg,
            )),
            DoipError::Protocol(msg) => VmgError::Protocol(msg),
            DoipError::Uds { service, code } => VmgError::Protocol(format!(
                "UDS negative response: service 0x{:02X}, NRC 0x{:02X}",
                service, code
            )),
            DoipError::NotActive => VmgError::State("DoIP client not active".into()),
            DoipError::Cancelled => VmgError::Cancelled,
        }
    }
}
