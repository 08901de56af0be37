//! Common error types for the VMG gateway

use thiserror::Error;

/// Result type for VMG operations
pub type VmgResult<T> = Result<T, VmgError>;

/// Errors that can occur anywhere in the gateway
#[derive(Debug, Error)]
pub enum VmgError {
    /// Socket, file or timeout error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed DoIP frame, unexpected payload type, UDS negative response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Magic mismatch, CRC mismatch, hash mismatch
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Package targets a different vehicle (VIN/model/year)
    #[error("Target mismatch: {0}")]
    TargetMismatch(String),

    /// Operation illegal in the current state
    #[error("State error: {0}")]
    State(String),

    /// Operation cancelled by external request
    #[error("Cancelled")]
    Cancelled,

    /// Missing or invalid configuration field
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VmgError {
    /// Short machine-readable kind, used in the `error` field of the final
    /// progress report.
    pub fn kind_str(&self) -> &'static str {
        match self {
            VmgError::Io(_) => "io",
            VmgError::Protocol(_) => "protocol",
            VmgError::Integrity(_) => "integrity",
            VmgError::TargetMismatch(_) => "target_mismatch",
            VmgError::State(_) => "state",
            VmgError::Cancelled => "cancelled",
            VmgError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(VmgError::Cancelled.kind_str(), "cancelled");
        assert_eq!(VmgError::Integrity("crc".into()).kind_str(), "integrity");
        assert_eq!(
            VmgError::TargetMismatch("vin".into()).kind_str(),
            "target_mismatch"
        );
    }
}
