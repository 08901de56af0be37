//! Fixed-size report records carried in the gateway's 0x9000/0x9001 frames
//!
//! A report payload is `[ecu_count: u8]` followed by `ecu_count` fixed-size
//! records. Record layouts match the gateway's packed structures: strings are
//! NUL-padded ASCII, multi-byte integers little-endian.

use serde::Serialize;

use crate::error::DoipError;

/// Trim a fixed-size NUL-padded field to a `String`.
pub(crate) fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn write_padded(out: &mut Vec<u8>, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let copy = bytes.len().min(len);
    out.extend_from_slice(&bytes[..copy]);
    out.resize(out.len() + (len - copy), 0);
}

/// Per-ECU configuration information (48 bytes on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VciInfo {
    pub ecu_id: String,
    pub sw_version: String,
    pub hw_version: String,
    pub serial_number: String,
}

impl VciInfo {
    pub const WIRE_LEN: usize = 48;

    pub fn decode(bytes: &[u8]) -> Result<Self, DoipError> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(DoipError::Protocol(format!(
                "VCI record too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            ecu_id: trim_nul(&bytes[0..16]),
            sw_version: trim_nul(&bytes[16..24]),
            hw_version: trim_nul(&bytes[24..32]),
            serial_number: trim_nul(&bytes[32..48]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        write_padded(&mut out, &self.ecu_id, 16);
        write_padded(&mut out, &self.sw_version, 8);
        write_padded(&mut out, &self.hw_version, 8);
        write_padded(&mut out, &self.serial_number, 16);
        out
    }
}

/// Per-ECU OTA readiness information (27 bytes on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessInfo {
    pub ecu_id: String,
    pub vehicle_parked: bool,
    pub engine_off: bool,
    pub battery_voltage_mv: u16,
    pub available_memory_kb: u32,
    pub all_doors_closed: bool,
    pub compatible: bool,
    pub ready_for_update: bool,
}

impl ReadinessInfo {
    pub const WIRE_LEN: usize = 27;

    pub fn decode(bytes: &[u8]) -> Result<Self, DoipError> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(DoipError::Protocol(format!(
                "readiness record too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            ecu_id: trim_nul(&bytes[0..16]),
            vehicle_parked: bytes[16] != 0,
            engine_off: bytes[17] != 0,
            battery_voltage_mv: u16::from_le_bytes([bytes[18], bytes[19]]),
            available_memory_kb: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            all_doors_closed: bytes[24] != 0,
            compatible: bytes[25] != 0,
            ready_for_update: bytes[26] != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        write_padded(&mut out, &self.ecu_id, 16);
        out.push(self.vehicle_parked as u8);
        out.push(self.engine_off as u8);
        out.extend_from_slice(&self.battery_voltage_mv.to_le_bytes());
        out.extend_from_slice(&self.available_memory_kb.to_le_bytes());
        out.push(self.all_doors_closed as u8);
        out.push(self.compatible as u8);
        out.push(self.ready_for_update as u8);
        out
    }
}

/// Parse a `[count][record × count]` report payload.
pub fn parse_report<T, F>(payload: &[u8], record_len: usize, decode: F) -> Result<Vec<T>, DoipError>
where
    F: Fn(&[u8]) -> Result<T, DoipError>,
{
    let Some((&count, records)) = payload.split_first() else {
        return Err(DoipError::Protocol("empty report payload".into()));
    };
    let count = count as usize;
    if records.len() < count * record_len {
        return Err(DoipError::Protocol(format!(
            "report payload truncated: {} records declared, {} bytes present",
            count,
            records.len()
        )));
    }

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(decode(&records[i * record_len..(i + 1) * record_len])?);
    }
    Ok(out)
}

/// Encode a `[count][record × count]` report payload (gateway side).
pub fn encode_report<T, F>(records: &[T], encode: F) -> Vec<u8>
where
    F: Fn(&T) -> Vec<u8>,
{
    let mut out = vec![records.len() as u8];
    for record in records {
        out.extend_from_slice(&encode(record));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vci_record_roundtrip() {
        let info = VciInfo {
            ecu_id: "ECU_011".into(),
            sw_version: "1.1.2".into(),
            hw_version: "2.0".into(),
            serial_number: "091000001".into(),
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), VciInfo::WIRE_LEN);
        assert_eq!(VciInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn readiness_record_roundtrip() {
        let info = ReadinessInfo {
            ecu_id: "ECU_021".into(),
            vehicle_parked: true,
            engine_off: true,
            battery_voltage_mv: 12600,
            available_memory_kb: 8192,
            all_doors_closed: true,
            compatible: true,
            ready_for_update: false,
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), ReadinessInfo::WIRE_LEN);
        assert_eq!(ReadinessInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn report_payload_with_two_records() {
        let a = VciInfo {
            ecu_id: "ECU_011".into(),
            sw_version: "1.1.2".into(),
            hw_version: "2.0".into(),
            serial_number: "A".into(),
        };
        let b = VciInfo {
            ecu_id: "ECU_021".into(),
            sw_version: "1.0.5".into(),
            hw_version: "1.5".into(),
            serial_number: "B".into(),
        };
        let payload = encode_report(&[a.clone(), b.clone()], VciInfo::encode);
        assert_eq!(payload[0], 2);

        let parsed = parse_report(&payload, VciInfo::WIRE_LEN, VciInfo::decode).unwrap();
        assert_eq!(parsed, vec![a, b]);
        assert_eq!(parsed[0].sw_version, "1.1.2");
    }

    #[test]
    fn truncated_report_is_rejected() {
        let payload = vec![0x02, 0x00, 0x01];
        let err = parse_report(&payload, VciInfo::WIRE_LEN, VciInfo::decode);
        assert!(err.is_err());
    }
}
