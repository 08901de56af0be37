//! ECU package metadata (innermost layer)
//!
//! An ECU package is a 256-byte metadata block followed by the firmware
//! image. Layout (little-endian):
//!
//! ```text
//! offset  field
//!      0  magic            u32   "ECUM"
//!      4  ecu_id           [16]  NUL-padded
//!     20  sw_version       u32   packed vAA.BB.CC
//!     24  hw_version       u32
//!     28  firmware_size    u32
//!     32  firmware_crc32   u32
//!     36  build_timestamp  u32   epoch seconds
//!     40  version_string   [32]
//!     72  dependency_count u8    0..=8
//!     76  dependencies     8 × 20 (ecu_id[16] + min_version u32)
//! ```

use vmg_core::{VmgError, VmgResult};

use crate::codec::{FieldReader, FieldWriter};
use crate::{crc32, ECU_MAGIC, ECU_METADATA_LEN, MAX_ECU_DEPS};

const DEP_ENTRY_LEN: usize = 20;
const DEP_TABLE_OFFSET: usize = 76;

/// A dependency on another ECU's minimum software version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuDependency {
    pub ecu_id: String,
    pub min_version: u32,
}

/// Parsed ECU metadata block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuMetadata {
    pub ecu_id: String,
    pub sw_version: u32,
    pub hw_version: u32,
    pub firmware_size: u32,
    pub firmware_crc32: u32,
    pub build_timestamp: u32,
    pub version_string: String,
    pub dependencies: Vec<EcuDependency>,
}

impl EcuMetadata {
    /// Parse a 256-byte metadata block.
    pub fn parse(bytes: &[u8]) -> VmgResult<Self> {
        if bytes.len() < ECU_METADATA_LEN {
            return Err(VmgError::Integrity(format!(
                "ECU metadata truncated: {} bytes",
                bytes.len()
            )));
        }
        let reader = FieldReader::new(bytes);

        let magic = reader.u32_le_at(0)?;
        if magic != ECU_MAGIC {
            return Err(VmgError::Integrity(format!(
                "bad ECU metadata magic: 0x{:08X}",
                magic
            )));
        }

        let dependency_count = reader.u8_at(72)? as usize;
        if dependency_count > MAX_ECU_DEPS {
            return Err(VmgError::Integrity(format!(
                "dependency count {} exceeds limit {}",
                dependency_count, MAX_ECU_DEPS
            )));
        }

        let mut dependencies = Vec::with_capacity(dependency_count);
        for i in 0..dependency_count {
            let base = DEP_TABLE_OFFSET + i * DEP_ENTRY_LEN;
            dependencies.push(EcuDependency {
                ecu_id: reader.str_at(base, 16)?,
                min_version: reader.u32_le_at(base + 16)?,
            });
        }

        Ok(Self {
            ecu_id: reader.str_at(4, 16)?,
            sw_version: reader.u32_le_at(20)?,
            hw_version: reader.u32_le_at(24)?,
            firmware_size: reader.u32_le_at(28)?,
            firmware_crc32: reader.u32_le_at(32)?,
            build_timestamp: reader.u32_le_at(36)?,
            version_string: reader.str_at(40, 32)?,
            dependencies,
        })
    }

    /// Encode into a fresh 256-byte block.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new(ECU_METADATA_LEN);
        writer.put_u32_le(0, ECU_MAGIC);
        writer.put_str(4, &self.ecu_id, 16);
        writer.put_u32_le(20, self.sw_version);
        writer.put_u32_le(24, self.hw_version);
        writer.put_u32_le(28, self.firmware_size);
        writer.put_u32_le(32, self.firmware_crc32);
        writer.put_u32_le(36, self.build_timestamp);
        writer.put_str(40, &self.version_string, 32);
        writer.put_u8(72, self.dependencies.len() as u8);
        for (i, dep) in self.dependencies.iter().take(MAX_ECU_DEPS).enumerate() {
            let base = DEP_TABLE_OFFSET + i * DEP_ENTRY_LEN;
            writer.put_str(base, &dep.ecu_id, 16);
            writer.put_u32_le(base + 16, dep.min_version);
        }
        writer.into_bytes()
    }

    /// Check the firmware image against the stored size and CRC32.
    pub fn verify_firmware(&self, firmware: &[u8]) -> VmgResult<()> {
        if firmware.len() != self.firmware_size as usize {
            return Err(VmgError::Integrity(format!(
                "firmware size mismatch for {}: expected {}, got {}",
                self.ecu_id,
                self.firmware_size,
                firmware.len()
            )));
        }
        let actual = crc32(firmware);
        if actual != self.firmware_crc32 {
            return Err(VmgError::Integrity(format!(
                "firmware CRC mismatch for {}: expected 0x{:08X}, got 0x{:08X}",
                self.ecu_id, self.firmware_crc32, actual
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_version;

    fn sample() -> EcuMetadata {
        EcuMetadata {
            ecu_id: "ECU_011".into(),
            sw_version: encode_version("v2.0.1"),
            hw_version: encode_version("v1.0.0"),
            firmware_size: 4,
            firmware_crc32: crc32(&[1, 2, 3, 4]),
            build_timestamp: 1_731_800_000,
            version_string: "v2.0.1-20241117".into(),
            dependencies: vec![EcuDependency {
                ecu_id: "ECU_091".into(),
                min_version: encode_version("v2.0.0"),
            }],
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let meta = sample();
        let bytes = meta.encode();
        assert_eq!(bytes.len(), ECU_METADATA_LEN);
        assert_eq!(EcuMetadata::parse(&bytes).unwrap(), meta);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = sample().encode();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            EcuMetadata::parse(&bytes),
            Err(VmgError::Integrity(_))
        ));
    }

    #[test]
    fn firmware_verification() {
        let meta = sample();
        meta.verify_firmware(&[1, 2, 3, 4]).unwrap();
        assert!(meta.verify_firmware(&[1, 2, 3, 5]).is_err());
        assert!(meta.verify_firmware(&[1, 2, 3]).is_err());
    }
}
