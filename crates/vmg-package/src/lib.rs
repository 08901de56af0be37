//! vmg-package - Three-layer OTA package formats
//!
//! ```text
//! Vehicle Package (12 KiB header, magic "VPPK")
//!   └─ Zone Package (1 KiB header, magic "ZONE")        × up to 16
//!        └─ ECU Package (256 B metadata, magic "ECUM")  × up to 12 per zone
//! ```
//!
//! All header integers are little-endian, exactly as the producing tool lays
//! them out; every field goes through the explicit codecs in [`codec`] —
//! no struct is ever blitted from disk.

pub mod builder;
pub mod codec;
pub mod ecu;
pub mod vehicle;
pub mod zone;

pub use builder::{EcuPackageBuilder, VehiclePackageBuilder, ZonePackageBuilder};
pub use ecu::{EcuDependency, EcuMetadata};
pub use vehicle::{VehicleHeader, VehiclePackageParser, ZonePackageInfo};
pub use zone::{ZoneEcuEntry, ZoneHeader, ZonePackageParser};

use crc::{Crc, CRC_32_ISO_HDLC};

/// Vehicle Package magic ("VPPK")
pub const VEHICLE_MAGIC: u32 = 0x5650_504B;
/// Zone Package magic ("ZONE")
pub const ZONE_MAGIC: u32 = 0x5A4F_4E45;
/// ECU metadata magic ("ECUM")
pub const ECU_MAGIC: u32 = 0x4543_554D;

/// Vehicle Package header length
pub const VEHICLE_HEADER_LEN: usize = 12 * 1024;
/// Zone Package header length
pub const ZONE_HEADER_LEN: usize = 1024;
/// ECU metadata length
pub const ECU_METADATA_LEN: usize = 256;

/// Maximum zones referenced by a Vehicle Package
pub const MAX_ZONES: usize = 16;
/// Maximum ECU quick-reference entries in a Vehicle Package
pub const MAX_VEHICLE_ECUS: usize = 256;
/// ECU entries that fit the zone header table (offset 256, 64 B each)
pub const MAX_ZONE_ECUS: usize = 12;
/// Maximum dependency records in an ECU metadata block
pub const MAX_ECU_DEPS: usize = 8;

/// zlib-compatible CRC32 (IEEE 802.3 polynomial)
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot CRC32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Encode a dotted version string into the packed `(major<<16)|(minor<<8)|patch`
/// form the packages carry. Accepts an optional leading `v`.
pub fn encode_version(version: &str) -> u32 {
    let mut parts = version.trim_start_matches('v').split('.');
    let mut next = || {
        parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .unwrap_or(0)
    };
    let (major, minor, patch) = (next(), next(), next());
    (major << 16) | ((minor & 0xFF) << 8) | (patch & 0xFF)
}

/// Render a packed version as `vMAJ.MIN.PATCH`.
pub fn format_version(version: u32) -> String {
    format!(
        "v{}.{}.{}",
        (version >> 16) & 0xFFFF,
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_zlib_vector() {
        // zlib crc32(b"123456789") == 0xCBF43926
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn version_codec_roundtrip() {
        assert_eq!(encode_version("v1.2.3"), 0x0001_0203);
        assert_eq!(encode_version("2.0.1"), 0x0002_0001);
        assert_eq!(format_version(0x0001_0203), "v1.2.3");
    }
}
