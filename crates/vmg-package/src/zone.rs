//! Zone package parsing (middle layer)
//!
//! A zone package is a 1 KiB header followed by the concatenated ECU
//! packages. Header layout (little-endian):
//!
//! ```text
//! offset  field
//!      0  magic          u32  "ZONE"
//!      4  version        u32
//!      8  total_size     u32  header + payload
//!     12  zone_id        [16]
//!     28  zone_number    u8
//!     29  package_count  u8   1..=12
//!     32  zone_crc32     u32  CRC32 of bytes after the header
//!     36  timestamp      u32
//!     40  zone_name      [32]
//!    256  ecu_table      12 × 64
//! ```
//!
//! ECU table entry: ecu_id[16] @0, offset u32 @16, size u32 @20,
//! metadata_size u32 @24, firmware_size u32 @28, firmware_version u32 @32,
//! crc32 u32 @36, priority u8 @40.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vmg_core::{VmgError, VmgResult};

use crate::codec::FieldReader;
use crate::{CRC32, MAX_ZONE_ECUS, ZONE_HEADER_LEN, ZONE_MAGIC};

const ECU_TABLE_OFFSET: usize = 256;
const ECU_ENTRY_LEN: usize = 64;

/// One ECU package referenced by the zone header table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneEcuEntry {
    pub ecu_id: String,
    /// Offset of the ECU package within the zone file
    pub offset: u32,
    /// Total ECU package size (metadata + firmware)
    pub size: u32,
    pub metadata_size: u32,
    pub firmware_size: u32,
    pub firmware_version: u32,
    pub crc32: u32,
    /// 0 = highest update priority
    pub priority: u8,
}

/// Parsed zone package header
#[derive(Debug, Clone)]
pub struct ZoneHeader {
    pub version: u32,
    pub total_size: u32,
    pub zone_id: String,
    pub zone_number: u8,
    pub package_count: u8,
    pub zone_crc32: u32,
    pub timestamp: u32,
    pub zone_name: String,
    pub ecu_table: Vec<ZoneEcuEntry>,
}

/// Parser for one zone package file; created per package, discarded after use
pub struct ZonePackageParser {
    path: PathBuf,
    header: Option<ZoneHeader>,
}

impl ZonePackageParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
        }
    }

    /// Read and validate the 1 KiB header.
    pub fn parse(&mut self) -> VmgResult<&ZoneHeader> {
        debug!(path = %self.path.display(), "parsing zone package");

        let mut file = File::open(&self.path)?;
        let mut buf = vec![0u8; ZONE_HEADER_LEN];
        file.read_exact(&mut buf)?;
        let reader = FieldReader::new(&buf);

        let magic = reader.u32_le_at(0)?;
        if magic != ZONE_MAGIC {
            return Err(VmgError::Integrity(format!(
                "bad zone package magic: 0x{:08X}",
                magic
            )));
        }

        let total_size = reader.u32_le_at(8)?;
        if (total_size as usize) < ZONE_HEADER_LEN {
            return Err(VmgError::Integrity(format!(
                "zone total size {} smaller than header",
                total_size
            )));
        }

        let package_count = reader.u8_at(29)?;
        if package_count == 0 || package_count as usize > MAX_ZONE_ECUS {
            return Err(VmgError::Integrity(format!(
                "zone package count {} outside 1..={}",
                package_count, MAX_ZONE_ECUS
            )));
        }

        let mut ecu_table = Vec::with_capacity(package_count as usize);
        for i in 0..package_count as usize {
            let base = ECU_TABLE_OFFSET + i * ECU_ENTRY_LEN;
            let entry = ZoneEcuEntry {
                ecu_id: reader.str_at(base, 16)?,
                offset: reader.u32_le_at(base + 16)?,
                size: reader.u32_le_at(base + 20)?,
                metadata_size: reader.u32_le_at(base + 24)?,
                firmware_size: reader.u32_le_at(base + 28)?,
                firmware_version: reader.u32_le_at(base + 32)?,
                crc32: reader.u32_le_at(base + 36)?,
                priority: reader.u8_at(base + 40)?,
            };
            if entry.ecu_id.is_empty() {
                return Err(VmgError::Integrity(format!(
                    "zone declares {} ECUs but entry {} is empty",
                    package_count, i
                )));
            }
            if (entry.offset as usize) < ZONE_HEADER_LEN
                || entry
                    .offset
                    .checked_add(entry.size)
                    .map(|end| end > total_size)
                    .unwrap_or(true)
            {
                return Err(VmgError::Integrity(format!(
                    "ECU {} range {}..{} outside zone package",
                    entry.ecu_id,
                    entry.offset,
                    entry.offset as u64 + entry.size as u64
                )));
            }
            ecu_table.push(entry);
        }

        let header = ZoneHeader {
            version: reader.u32_le_at(4)?,
            total_size,
            zone_id: reader.str_at(12, 16)?,
            zone_number: reader.u8_at(28)?,
            package_count,
            zone_crc32: reader.u32_le_at(32)?,
            timestamp: reader.u32_le_at(36)?,
            zone_name: reader.str_at(40, 32)?,
            ecu_table,
        };

        info!(
            zone = header.zone_number,
            zone_id = %header.zone_id,
            ecus = header.package_count,
            size = header.total_size,
            "zone package parsed"
        );

        self.header = Some(header);
        Ok(self.header.as_ref().unwrap())
    }

    /// Stream the payload after the header and compare its CRC32 against
    /// `zone_crc32`.
    pub fn verify(&self) -> VmgResult<()> {
        let header = self.require_parsed()?;

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(ZONE_HEADER_LEN as u64))?;

        let mut digest = CRC32.digest();
        let mut remaining = header.total_size as u64 - ZONE_HEADER_LEN as u64;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let got = reader.read(&mut buf[..want])?;
            if got == 0 {
                return Err(VmgError::Integrity(format!(
                    "zone package truncated: {} bytes missing",
                    remaining
                )));
            }
            digest.update(&buf[..got]);
            remaining -= got as u64;
        }

        let actual = digest.finalize();
        if actual != header.zone_crc32 {
            return Err(VmgError::Integrity(format!(
                "zone CRC mismatch: expected 0x{:08X}, got 0x{:08X}",
                header.zone_crc32, actual
            )));
        }

        debug!(crc = format!("0x{:08X}", actual), "zone package verified");
        Ok(())
    }

    pub fn header(&self) -> Option<&ZoneHeader> {
        self.header.as_ref()
    }

    pub fn ecu_entries(&self) -> &[ZoneEcuEntry] {
        self.header
            .as_ref()
            .map(|h| h.ecu_table.as_slice())
            .unwrap_or(&[])
    }

    pub fn ecu_ids(&self) -> Vec<String> {
        self.ecu_entries().iter().map(|e| e.ecu_id.clone()).collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn require_parsed(&self) -> VmgResult<&ZoneHeader> {
        self.header
            .as_ref()
            .ok_or_else(|| VmgError::State("zone package not parsed yet".into()))
    }
}
