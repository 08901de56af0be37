//! DoIP wire format (ISO 13400-2)
//!
//! Every message is an 8-byte header followed by the payload:
//!
//! ```text
//! ┌────────┬────────┬─────────────────┬─────────────────────┬─────────┐
//! │ version│ ~ver   │ payload type    │ payload length      │ payload │
//! │ 0x02   │ 0xFD   │ u16 big-endian  │ u32 big-endian      │ N bytes │
//! └────────┴────────┴─────────────────┴─────────────────────┴─────────┘
//! ```
//!
//! All header fields are big-endian on the wire; fields are written through
//! explicit byte accessors, never memory blits.

use crate::error::DoipError;

pub const PROTOCOL_VERSION: u8 = 0x02;
pub const INVERSE_VERSION: u8 = 0xFD;
pub const HEADER_LEN: usize = 8;

/// VMG tester logical address
pub const VMG_ADDRESS: u16 = 0x0200;
/// Zone Gateway logical address
pub const ZGW_ADDRESS: u16 = 0x0100;
/// Default DoIP TCP port
pub const DOIP_PORT: u16 = 13400;

/// Routing activation result code for success
pub const ACTIVATION_SUCCESS: u8 = 0x10;

/// UDS negative response service id
pub const UDS_NEGATIVE_RESPONSE: u8 = 0x7F;
/// Offset added to a request SID for its positive response
pub const UDS_POSITIVE_OFFSET: u8 = 0x40;

/// Routine control sub-function: start routine
pub const ROUTINE_START: u8 = 0x01;

/// Gateway routine identifiers
pub mod routine_id {
    /// Start VCI collection
    pub const VCI_COLLECTION_START: u16 = 0xF001;
    /// Request VCI report (followed by a 0x9000 frame)
    pub const VCI_SEND_REPORT: u16 = 0xF002;
    /// Start readiness check
    pub const READINESS_CHECK: u16 = 0xF003;
    /// Request readiness report (followed by a 0x9001 frame)
    pub const READINESS_SEND_REPORT: u16 = 0xF004;
}

/// DoIP payload types in use between VMG and ZGW
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    GenericNack,
    RoutingActivationRequest,
    RoutingActivationResponse,
    AliveCheckRequest,
    AliveCheckResponse,
    DiagnosticMessage,
    DiagnosticAck,
    DiagnosticNack,
    /// Gateway-specific: VCI report frame
    VciReport,
    /// Gateway-specific: readiness report frame
    ReadinessReport,
    Unknown(u16),
}

impl PayloadType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Self::GenericNack,
            0x0005 => Self::RoutingActivationRequest,
            0x0006 => Self::RoutingActivationResponse,
            0x0007 => Self::AliveCheckRequest,
            0x0008 => Self::AliveCheckResponse,
            0x8001 => Self::DiagnosticMessage,
            0x8002 => Self::DiagnosticAck,
            0x8003 => Self::DiagnosticNack,
            0x9000 => Self::VciReport,
            0x9001 => Self::ReadinessReport,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::GenericNack => 0x0000,
            Self::RoutingActivationRequest => 0x0005,
            Self::RoutingActivationResponse => 0x0006,
            Self::AliveCheckRequest => 0x0007,
            Self::AliveCheckResponse => 0x0008,
            Self::DiagnosticMessage => 0x8001,
            Self::DiagnosticAck => 0x8002,
            Self::DiagnosticNack => 0x8003,
            Self::VciReport => 0x9000,
            Self::ReadinessReport => 0x9001,
            Self::Unknown(other) => other,
        }
    }
}

/// Parsed DoIP header
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub payload_type: PayloadType,
    pub payload_len: u32,
}

impl Header {
    /// Parse and validate the fixed 8-byte header.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, DoipError> {
        if bytes[0] != PROTOCOL_VERSION || bytes[1] != INVERSE_VERSION {
            return Err(DoipError::Protocol(format!(
                "bad DoIP version bytes: {:02X} {:02X}",
                bytes[0], bytes[1]
            )));
        }
        let payload_type = PayloadType::from_u16(u16::from_be_bytes([bytes[2], bytes[3]]));
        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            payload_type,
            payload_len,
        })
    }
}

/// Frame a payload into a complete DoIP message.
pub fn encode_message(payload_type: PayloadType, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
    message.push(PROTOCOL_VERSION);
    message.push(INVERSE_VERSION);
    message.extend_from_slice(&payload_type.to_u16().to_be_bytes());
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    message
}

/// Routing activation request payload:
/// source address (2, big-endian) + activation type (1) + reserved (4).
pub fn routing_activation_request(source_address: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(7);
    payload.extend_from_slice(&source_address.to_be_bytes());
    payload.push(0x00); // default activation
    payload.extend_from_slice(&[0x00; 4]);
    payload
}

/// Routing activation response payload: SA (2) + TA (2) + code (1) + reserved (4).
/// Returns the response code.
pub fn parse_routing_activation_response(payload: &[u8]) -> Result<u8, DoipError> {
    if payload.len() < 9 {
        return Err(DoipError::Protocol(format!(
            "routing activation response too short: {} bytes",
            payload.len()
        )));
    }
    Ok(payload[4])
}

/// Diagnostic message payload: SA (2) + TA (2) + UDS service id + UDS data.
pub fn diagnostic_request(
    source_address: u16,
    target_address: u16,
    service_id: u8,
    data: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5 + data.len());
    payload.extend_from_slice(&source_address.to_be_bytes());
    payload.extend_from_slice(&target_address.to_be_bytes());
    payload.push(service_id);
    payload.extend_from_slice(data);
    payload
}

/// Strip the SA/TA framing from a diagnostic message payload, returning the
/// UDS bytes (positive-response SID or 0x7F first).
pub fn diagnostic_response_uds(payload: &[u8]) -> Result<&[u8], DoipError> {
    if payload.len() < 5 {
        return Err(DoipError::Protocol(format!(
            "diagnostic response too short: {} bytes",
            payload.len()
        )));
    }
    Ok(&payload[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let message = encode_message(PayloadType::DiagnosticMessage, &[0xAA, 0xBB]);
        assert_eq!(message.len(), HEADER_LEN + 2);
        assert_eq!(&message[..2], &[0x02, 0xFD]);
        assert_eq!(&message[2..4], &[0x80, 0x01]);
        assert_eq!(&message[4..8], &[0x00, 0x00, 0x00, 0x02]);

        let header = Header::parse(message[..8].try_into().unwrap()).unwrap();
        assert_eq!(header.payload_type, PayloadType::DiagnosticMessage);
        assert_eq!(header.payload_len, 2);
    }

    #[test]
    fn bad_version_rejected() {
        let bytes = [0x03, 0xFD, 0x00, 0x05, 0, 0, 0, 0];
        assert!(Header::parse(&bytes).is_err());
    }

    #[test]
    fn custom_payload_types_survive() {
        assert_eq!(PayloadType::from_u16(0x9000), PayloadType::VciReport);
        assert_eq!(PayloadType::from_u16(0x9001), PayloadType::ReadinessReport);
        assert_eq!(PayloadType::from_u16(0x9002), PayloadType::Unknown(0x9002));
        assert_eq!(PayloadType::Unknown(0x9002).to_u16(), 0x9002);
    }

    #[test]
    fn routing_activation_payload_layout() {
        let payload = routing_activation_request(VMG_ADDRESS);
        assert_eq!(payload, vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn diagnostic_payload_frames_addresses_big_endian() {
        let payload = diagnostic_request(VMG_ADDRESS, ZGW_ADDRESS, 0x31, &[0x01, 0xF0, 0x01]);
        assert_eq!(
            payload,
            vec![0x02, 0x00, 0x01, 0x00, 0x31, 0x01, 0xF0, 0x01]
        );
        let uds = diagnostic_response_uds(&payload).unwrap();
        assert_eq!(uds, &[0x31, 0x01, 0xF0, 0x01]);
    }
}
