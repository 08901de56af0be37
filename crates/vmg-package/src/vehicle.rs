//! Vehicle package parsing (top layer)
//!
//! A vehicle package is a 12 KiB header followed by the concatenated zone
//! packages. Header layout (little-endian, offsets as the producing tool
//! writes them):
//!
//! ```text
//! offset  field
//!      0  magic             u32  "VPPK"
//!      4  version           u32
//!      8  total_size        u32
//!     12  vin               [17]
//!     29  model             [32]
//!     61  model_year        u16
//!     63  region            u8
//!     76  master_sw_version u32
//!     80  master_sw_string  [32]
//!    128  zone_count        u8   1..=16
//!    129  total_ecu_count   u8
//!    144  vehicle_crc32     u32  CRC32 of bytes after the header
//!    148  metadata_crc32    u32  CRC32 of the header with both CRC fields
//!                                zeroed; 0 = not present
//!    192  zone_refs         16 × 32
//!    704  ecu_refs          256 × 32
//! ```
//!
//! Zone reference: zone_id[16] @0, offset u32 @16, size u32 @20,
//! zone_number u8 @24, ecu_count u8 @25.
//! ECU reference: ecu_id[16] @0, zone_number u8 @16, firmware_version u32 @17.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vmg_core::{VmgError, VmgResult, ZgwEndpoint, ZoneRoutingTable};

use crate::codec::FieldReader;
use crate::{CRC32, MAX_VEHICLE_ECUS, MAX_ZONES, VEHICLE_HEADER_LEN, VEHICLE_MAGIC};

pub(crate) const ZONE_REF_OFFSET: usize = 192;
pub(crate) const ZONE_REF_LEN: usize = 32;
pub(crate) const ECU_REF_OFFSET: usize = 704;
pub(crate) const ECU_REF_LEN: usize = 32;
pub(crate) const VEHICLE_CRC_OFFSET: usize = 144;
pub(crate) const METADATA_CRC_OFFSET: usize = 148;

/// Zone reference from the vehicle header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRef {
    pub zone_id: String,
    pub offset: u32,
    pub size: u32,
    pub zone_number: u8,
    pub ecu_count: u8,
}

/// ECU quick-reference entry from the vehicle header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuRef {
    pub ecu_id: String,
    pub zone_number: u8,
    pub firmware_version: u32,
}

/// Parsed vehicle package header
#[derive(Debug, Clone)]
pub struct VehicleHeader {
    pub version: u32,
    pub total_size: u32,
    pub vin: String,
    pub model: String,
    pub model_year: u16,
    pub region: u8,
    pub master_sw_version: u32,
    pub master_sw_string: String,
    pub zone_count: u8,
    pub total_ecu_count: u8,
    pub vehicle_crc32: u32,
    pub metadata_crc32: u32,
    pub zone_refs: Vec<ZoneRef>,
    pub ecu_refs: Vec<EcuRef>,
}

/// A zone extracted (or extractable) from the vehicle package, with its
/// resolved delivery target
#[derive(Debug, Clone)]
pub struct ZonePackageInfo {
    pub zone_id: String,
    pub zone_number: u8,
    pub offset: u32,
    pub size: u32,
    pub ecu_count: u8,
    pub target: ZgwEndpoint,
    /// Filled in by extraction
    pub extracted_path: Option<PathBuf>,
}

/// Parser for one vehicle package file; created per OTA transaction
pub struct VehiclePackageParser {
    path: PathBuf,
    header: Option<VehicleHeader>,
    zones: Vec<ZonePackageInfo>,
}

impl VehiclePackageParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
            zones: Vec::new(),
        }
    }

    /// Read the 12 KiB header, validate the reference tables and resolve
    /// each zone's target ZGW through `routing`.
    pub fn parse(&mut self, routing: &ZoneRoutingTable) -> VmgResult<&VehicleHeader> {
        info!(path = %self.path.display(), "parsing vehicle package");

        let mut file = File::open(&self.path)?;
        let mut buf = vec![0u8; VEHICLE_HEADER_LEN];
        file.read_exact(&mut buf)?;
        let reader = FieldReader::new(&buf);

        let magic = reader.u32_le_at(0)?;
        if magic != VEHICLE_MAGIC {
            return Err(VmgError::Integrity(format!(
                "bad vehicle package magic: 0x{:08X}",
                magic
            )));
        }

        let total_size = reader.u32_le_at(8)?;
        let zone_count = reader.u8_at(128)?;
        if zone_count == 0 || zone_count as usize > MAX_ZONES {
            return Err(VmgError::Integrity(format!(
                "zone count {} outside 1..={}",
                zone_count, MAX_ZONES
            )));
        }

        // Zone reference table: offsets strictly increasing, contained in
        // the file, zone numbers unique.
        let mut zone_refs = Vec::with_capacity(zone_count as usize);
        let mut seen_numbers = HashSet::new();
        let mut cursor = VEHICLE_HEADER_LEN as u64;
        let mut payload_total: u64 = 0;
        for i in 0..zone_count as usize {
            let base = ZONE_REF_OFFSET + i * ZONE_REF_LEN;
            let zone = ZoneRef {
                zone_id: reader.str_at(base, 16)?,
                offset: reader.u32_le_at(base + 16)?,
                size: reader.u32_le_at(base + 20)?,
                zone_number: reader.u8_at(base + 24)?,
                ecu_count: reader.u8_at(base + 25)?,
            };
            if zone.size == 0 {
                return Err(VmgError::Integrity(format!(
                    "zone {} has zero size",
                    zone.zone_number
                )));
            }
            if !seen_numbers.insert(zone.zone_number) {
                return Err(VmgError::Integrity(format!(
                    "duplicate zone number {}",
                    zone.zone_number
                )));
            }
            if (zone.offset as u64) < cursor {
                return Err(VmgError::Integrity(format!(
                    "zone {} offset {} overlaps previous data ending at {}",
                    zone.zone_number, zone.offset, cursor
                )));
            }
            let end = zone.offset as u64 + zone.size as u64;
            if end > total_size as u64 {
                return Err(VmgError::Integrity(format!(
                    "zone {} range {}..{} outside package of {} bytes",
                    zone.zone_number, zone.offset, end, total_size
                )));
            }
            cursor = end;
            payload_total += zone.size as u64;
            debug!(
                zone = zone.zone_number,
                zone_id = %zone.zone_id,
                offset = zone.offset,
                size = zone.size,
                "zone reference"
            );
            zone_refs.push(zone);
        }

        // The file holds nothing but the referenced zones (trailing padding
        // inside total_size is tolerated).
        if VEHICLE_HEADER_LEN as u64 + payload_total > total_size as u64 {
            return Err(VmgError::Integrity(format!(
                "zone sizes ({} bytes) exceed declared package size {}",
                payload_total, total_size
            )));
        }

        // ECU quick-reference table: entries until the first blank id; each
        // must name a zone present in the zone table.
        let mut ecu_refs = Vec::new();
        for i in 0..MAX_VEHICLE_ECUS {
            let base = ECU_REF_OFFSET + i * ECU_REF_LEN;
            let ecu_id = reader.str_at(base, 16)?;
            if ecu_id.is_empty() {
                break;
            }
            let entry = EcuRef {
                ecu_id,
                zone_number: reader.u8_at(base + 16)?,
                firmware_version: reader.u32_le_at(base + 17)?,
            };
            if !seen_numbers.contains(&entry.zone_number) {
                return Err(VmgError::Integrity(format!(
                    "ECU {} references unknown zone {}",
                    entry.ecu_id, entry.zone_number
                )));
            }
            ecu_refs.push(entry);
        }

        let total_ecu_count = reader.u8_at(129)?;
        let ecu_sum: u32 = zone_refs.iter().map(|z| z.ecu_count as u32).sum();
        if total_ecu_count != 0 && total_ecu_count as u32 != ecu_sum {
            return Err(VmgError::Integrity(format!(
                "total ECU count {} does not match zone tables ({})",
                total_ecu_count, ecu_sum
            )));
        }

        let metadata_crc32 = reader.u32_le_at(METADATA_CRC_OFFSET)?;
        if metadata_crc32 != 0 {
            let mut scrubbed = buf.clone();
            scrubbed[VEHICLE_CRC_OFFSET..VEHICLE_CRC_OFFSET + 8].fill(0);
            let actual = CRC32.checksum(&scrubbed);
            if actual != metadata_crc32 {
                return Err(VmgError::Integrity(format!(
                    "header CRC mismatch: expected 0x{:08X}, got 0x{:08X}",
                    metadata_crc32, actual
                )));
            }
        }

        let header = VehicleHeader {
            version: reader.u32_le_at(4)?,
            total_size,
            vin: reader.str_at(12, 17)?,
            model: reader.str_at(29, 32)?,
            model_year: reader.u16_le_at(61)?,
            region: reader.u8_at(63)?,
            master_sw_version: reader.u32_le_at(76)?,
            master_sw_string: reader.str_at(80, 32)?,
            zone_count,
            total_ecu_count,
            vehicle_crc32: reader.u32_le_at(VEHICLE_CRC_OFFSET)?,
            metadata_crc32,
            zone_refs,
            ecu_refs,
        };

        self.zones = header
            .zone_refs
            .iter()
            .map(|z| ZonePackageInfo {
                zone_id: z.zone_id.clone(),
                zone_number: z.zone_number,
                offset: z.offset,
                size: z.size,
                ecu_count: z.ecu_count,
                target: routing.resolve(z.zone_number),
                extracted_path: None,
            })
            .collect();

        info!(
            vin = %header.vin,
            model = %header.model,
            year = header.model_year,
            zones = header.zone_count,
            ecus = header.total_ecu_count,
            "vehicle package parsed"
        );

        self.header = Some(header);
        Ok(self.header.as_ref().unwrap())
    }

    /// Stream everything after the header and compare its CRC32 against
    /// `vehicle_crc32`.
    pub fn verify(&self) -> VmgResult<()> {
        let header = self.require_parsed()?;

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(VEHICLE_HEADER_LEN as u64))?;

        let mut digest = CRC32.digest();
        let mut remaining = header.total_size as u64 - VEHICLE_HEADER_LEN as u64;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let got = reader.read(&mut buf[..want])?;
            if got == 0 {
                return Err(VmgError::Integrity(format!(
                    "vehicle package truncated: {} bytes missing",
                    remaining
                )));
            }
            digest.update(&buf[..got]);
            remaining -= got as u64;
        }

        let actual = digest.finalize();
        if actual != header.vehicle_crc32 {
            return Err(VmgError::Integrity(format!(
                "vehicle CRC mismatch: expected 0x{:08X}, got 0x{:08X}",
                header.vehicle_crc32, actual
            )));
        }

        info!(crc = format!("0x{:08X}", actual), "vehicle package verified");
        Ok(())
    }

    /// Check the package targets this vehicle.
    pub fn verify_target(&self, vin: &str, model: &str, model_year: u16) -> VmgResult<()> {
        let header = self.require_parsed()?;

        if header.vin != vin {
            return Err(VmgError::TargetMismatch(format!(
                "VIN: package {}, vehicle {}",
                header.vin, vin
            )));
        }
        if header.model != model {
            return Err(VmgError::TargetMismatch(format!(
                "model: package {}, vehicle {}",
                header.model, model
            )));
        }
        if header.model_year != model_year {
            return Err(VmgError::TargetMismatch(format!(
                "model year: package {}, vehicle {}",
                header.model_year, model_year
            )));
        }

        debug!(vin, model, model_year, "vehicle target verified");
        Ok(())
    }

    pub fn header(&self) -> Option<&VehicleHeader> {
        self.header.as_ref()
    }

    /// Zones with routing targets, in declaration order.
    pub fn zones(&self) -> &[ZonePackageInfo] {
        &self.zones
    }

    /// Copy one zone's byte range out of the package.
    pub fn extract_zone(&mut self, zone_number: u8, output_path: &Path) -> VmgResult<()> {
        self.require_parsed()?;
        let zone = self
            .zones
            .iter_mut()
            .find(|z| z.zone_number == zone_number)
            .ok_or_else(|| {
                VmgError::State(format!("zone {} not present in package", zone_number))
            })?;

        let mut src = File::open(&self.path)?;
        src.seek(SeekFrom::Start(zone.offset as u64))?;

        let mut dst = File::create(output_path)?;
        let mut remaining = zone.size as u64;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let got = src.read(&mut buf[..want])?;
            if got == 0 {
                return Err(VmgError::Integrity(format!(
                    "zone {} truncated in package",
                    zone_number
                )));
            }
            dst.write_all(&buf[..got])?;
            remaining -= got as u64;
        }
        dst.flush()?;

        debug!(
            zone = zone_number,
            bytes = zone.size,
            path = %output_path.display(),
            "zone extracted"
        );
        zone.extracted_path = Some(output_path.to_path_buf());
        Ok(())
    }

    /// Extract every zone into `output_dir/zone_<N>.bin`.
    pub fn extract_all(&mut self, output_dir: &Path) -> VmgResult<()> {
        self.require_parsed()?;
        std::fs::create_dir_all(output_dir)?;

        let numbers: Vec<u8> = self.zones.iter().map(|z| z.zone_number).collect();
        for zone_number in numbers {
            let path = output_dir.join(format!("zone_{}.bin", zone_number));
            self.extract_zone(zone_number, &path)?;
        }

        info!(dir = %output_dir.display(), zones = self.zones.len(), "all zones extracted");
        Ok(())
    }

    fn require_parsed(&self) -> VmgResult<&VehicleHeader> {
        self.header
            .as_ref()
            .ok_or_else(|| VmgError::State("vehicle package not parsed yet".into()))
    }
}
