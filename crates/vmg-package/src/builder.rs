//! Package builders (producer side)
//!
//! Byte-exact construction of ECU, zone and vehicle packages — the
//! counterpart of the parsers, used by packaging tooling and as the fixture
//! generator for round-trip tests.

use std::path::Path;

use vmg_core::VmgResult;

use crate::codec::FieldWriter;
use crate::ecu::EcuDependency;
use crate::vehicle::{
    ECU_REF_LEN, ECU_REF_OFFSET, METADATA_CRC_OFFSET, VEHICLE_CRC_OFFSET, ZONE_REF_LEN,
    ZONE_REF_OFFSET,
};
use crate::{
    crc32, encode_version, CRC32, ECU_MAGIC, ECU_METADATA_LEN, MAX_ECU_DEPS, MAX_VEHICLE_ECUS,
    MAX_ZONES, MAX_ZONE_ECUS, VEHICLE_HEADER_LEN, VEHICLE_MAGIC, ZONE_HEADER_LEN, ZONE_MAGIC,
};

const FORMAT_VERSION: u32 = 0x0001_0000; // v1.0

/// Builds one ECU package: 256-byte metadata + firmware image
pub struct EcuPackageBuilder {
    ecu_id: String,
    version: String,
    hw_version: String,
    priority: u8,
    build_timestamp: u32,
    firmware: Vec<u8>,
    dependencies: Vec<EcuDependency>,
}

pub(crate) struct BuiltEcu {
    pub ecu_id: String,
    pub bytes: Vec<u8>,
    pub firmware_size: u32,
    pub firmware_version: u32,
    pub priority: u8,
}

impl EcuPackageBuilder {
    pub fn new(ecu_id: impl Into<String>) -> Self {
        Self {
            ecu_id: ecu_id.into(),
            version: "v1.0.0".into(),
            hw_version: "v1.0.0".into(),
            priority: 0,
            build_timestamp: 0,
            firmware: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn hw_version(mut self, hw_version: impl Into<String>) -> Self {
        self.hw_version = hw_version.into();
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn build_timestamp(mut self, epoch_secs: u32) -> Self {
        self.build_timestamp = epoch_secs;
        self
    }

    pub fn firmware(mut self, firmware: Vec<u8>) -> Self {
        self.firmware = firmware;
        self
    }

    pub fn dependency(mut self, ecu_id: impl Into<String>, min_version: &str) -> Self {
        self.dependencies.push(EcuDependency {
            ecu_id: ecu_id.into(),
            min_version: encode_version(min_version),
        });
        self
    }

    pub(crate) fn build(self) -> BuiltEcu {
        assert!(
            self.dependencies.len() <= MAX_ECU_DEPS,
            "at most {} dependencies",
            MAX_ECU_DEPS
        );

        let firmware_version = encode_version(&self.version);
        let mut writer = FieldWriter::new(ECU_METADATA_LEN);
        writer.put_u32_le(0, ECU_MAGIC);
        writer.put_str(4, &self.ecu_id, 16);
        writer.put_u32_le(20, firmware_version);
        writer.put_u32_le(24, encode_version(&self.hw_version));
        writer.put_u32_le(28, self.firmware.len() as u32);
        writer.put_u32_le(32, crc32(&self.firmware));
        writer.put_u32_le(36, self.build_timestamp);
        writer.put_str(40, &self.version, 32);
        writer.put_u8(72, self.dependencies.len() as u8);
        for (i, dep) in self.dependencies.iter().enumerate() {
            let base = 76 + i * 20;
            writer.put_str(base, &dep.ecu_id, 16);
            writer.put_u32_le(base + 16, dep.min_version);
        }

        let mut bytes = writer.into_bytes();
        bytes.extend_from_slice(&self.firmware);

        BuiltEcu {
            ecu_id: self.ecu_id,
            firmware_size: self.firmware.len() as u32,
            firmware_version,
            priority: self.priority,
            bytes,
        }
    }

    /// Standalone ECU package bytes (metadata + firmware).
    pub fn build_bytes(self) -> Vec<u8> {
        self.build().bytes
    }
}

/// Builds one zone package: 1 KiB header + concatenated ECU packages
pub struct ZonePackageBuilder {
    zone_id: String,
    zone_name: String,
    zone_number: u8,
    timestamp: u32,
    ecus: Vec<EcuPackageBuilder>,
}

pub(crate) struct BuiltZone {
    pub zone_id: String,
    pub zone_number: u8,
    pub ecu_count: u8,
    pub ecu_versions: Vec<(String, u32)>,
    pub bytes: Vec<u8>,
}

impl ZonePackageBuilder {
    pub fn new(zone_number: u8, zone_id: impl Into<String>) -> Self {
        let zone_id = zone_id.into();
        Self {
            zone_name: zone_id.clone(),
            zone_id,
            zone_number,
            timestamp: 0,
            ecus: Vec::new(),
        }
    }

    pub fn zone_name(mut self, name: impl Into<String>) -> Self {
        self.zone_name = name.into();
        self
    }

    pub fn timestamp(mut self, epoch_secs: u32) -> Self {
        self.timestamp = epoch_secs;
        self
    }

    pub fn ecu(mut self, ecu: EcuPackageBuilder) -> Self {
        self.ecus.push(ecu);
        self
    }

    pub(crate) fn build(self) -> BuiltZone {
        assert!(
            !self.ecus.is_empty() && self.ecus.len() <= MAX_ZONE_ECUS,
            "zone needs 1..={} ECUs",
            MAX_ZONE_ECUS
        );

        let built: Vec<BuiltEcu> = self.ecus.into_iter().map(EcuPackageBuilder::build).collect();

        let mut writer = FieldWriter::new(ZONE_HEADER_LEN);
        writer.put_u32_le(0, ZONE_MAGIC);
        writer.put_u32_le(4, FORMAT_VERSION);
        writer.put_str(12, &self.zone_id, 16);
        writer.put_u8(28, self.zone_number);
        writer.put_u8(29, built.len() as u8);
        writer.put_u32_le(36, self.timestamp);
        writer.put_str(40, &self.zone_name, 32);

        let mut offset = ZONE_HEADER_LEN as u32;
        for (i, ecu) in built.iter().enumerate() {
            let base = 256 + i * 64;
            writer.put_str(base, &ecu.ecu_id, 16);
            writer.put_u32_le(base + 16, offset);
            writer.put_u32_le(base + 20, ecu.bytes.len() as u32);
            writer.put_u32_le(base + 24, ECU_METADATA_LEN as u32);
            writer.put_u32_le(base + 28, ecu.firmware_size);
            writer.put_u32_le(base + 32, ecu.firmware_version);
            writer.put_u32_le(base + 36, crc32(&ecu.bytes));
            writer.put_u8(base + 40, ecu.priority);
            offset += ecu.bytes.len() as u32;
        }
        writer.put_u32_le(8, offset); // total size

        let mut bytes = writer.into_bytes();
        for ecu in &built {
            bytes.extend_from_slice(&ecu.bytes);
        }

        // Zone CRC covers everything after the header
        let payload_crc = CRC32.checksum(&bytes[ZONE_HEADER_LEN..]);
        bytes[32..36].copy_from_slice(&payload_crc.to_le_bytes());

        BuiltZone {
            zone_id: self.zone_id,
            zone_number: self.zone_number,
            ecu_count: built.len() as u8,
            ecu_versions: built
                .iter()
                .map(|e| (e.ecu_id.clone(), e.firmware_version))
                .collect(),
            bytes,
        }
    }

    /// Standalone zone package bytes.
    pub fn build_bytes(self) -> Vec<u8> {
        self.build().bytes
    }
}

/// Builds a complete vehicle package
pub struct VehiclePackageBuilder {
    vin: String,
    model: String,
    model_year: u16,
    region: u8,
    master_sw: String,
    zones: Vec<ZonePackageBuilder>,
}

impl VehiclePackageBuilder {
    pub fn new(vin: impl Into<String>, model: impl Into<String>, model_year: u16) -> Self {
        Self {
            vin: vin.into(),
            model: model.into(),
            model_year,
            region: 0,
            master_sw: "v2.0.0".into(),
            zones: Vec::new(),
        }
    }

    pub fn region(mut self, region: u8) -> Self {
        self.region = region;
        self
    }

    pub fn master_sw(mut self, version: impl Into<String>) -> Self {
        self.master_sw = version.into();
        self
    }

    pub fn zone(mut self, zone: ZonePackageBuilder) -> Self {
        self.zones.push(zone);
        self
    }

    pub fn build_bytes(self) -> Vec<u8> {
        assert!(
            !self.zones.is_empty() && self.zones.len() <= MAX_ZONES,
            "vehicle needs 1..={} zones",
            MAX_ZONES
        );

        let built: Vec<BuiltZone> = self.zones.into_iter().map(ZonePackageBuilder::build).collect();

        let mut writer = FieldWriter::new(VEHICLE_HEADER_LEN);
        writer.put_u32_le(0, VEHICLE_MAGIC);
        writer.put_u32_le(4, FORMAT_VERSION);
        writer.put_str(12, &self.vin, 17);
        writer.put_str(29, &self.model, 32);
        writer.put_u16_le(61, self.model_year);
        writer.put_u8(63, self.region);
        writer.put_u32_le(76, encode_version(&self.master_sw));
        writer.put_str(80, &self.master_sw, 32);
        writer.put_u8(128, built.len() as u8);

        let total_ecus: usize = built.iter().map(|z| z.ecu_count as usize).sum();
        writer.put_u8(129, total_ecus as u8);

        let mut offset = VEHICLE_HEADER_LEN as u32;
        for (i, zone) in built.iter().enumerate() {
            let base = ZONE_REF_OFFSET + i * ZONE_REF_LEN;
            writer.put_str(base, &zone.zone_id, 16);
            writer.put_u32_le(base + 16, offset);
            writer.put_u32_le(base + 20, zone.bytes.len() as u32);
            writer.put_u8(base + 24, zone.zone_number);
            writer.put_u8(base + 25, zone.ecu_count);
            offset += zone.bytes.len() as u32;
        }
        writer.put_u32_le(8, offset); // total size

        // ECU quick-reference table
        let mut slot = 0;
        for zone in &built {
            for (ecu_id, version) in &zone.ecu_versions {
                if slot >= MAX_VEHICLE_ECUS {
                    break;
                }
                let base = ECU_REF_OFFSET + slot * ECU_REF_LEN;
                writer.put_str(base, ecu_id, 16);
                writer.put_u8(base + 16, zone.zone_number);
                writer.put_u32_le(base + 17, *version);
                slot += 1;
            }
        }

        let mut bytes = writer.into_bytes();
        for zone in &built {
            bytes.extend_from_slice(&zone.bytes);
        }

        // Package CRC over everything after the header
        let payload_crc = CRC32.checksum(&bytes[VEHICLE_HEADER_LEN..]);
        bytes[VEHICLE_CRC_OFFSET..VEHICLE_CRC_OFFSET + 4]
            .copy_from_slice(&payload_crc.to_le_bytes());

        // Header CRC over the header with both CRC fields zeroed
        let mut scrubbed = bytes[..VEHICLE_HEADER_LEN].to_vec();
        scrubbed[VEHICLE_CRC_OFFSET..VEHICLE_CRC_OFFSET + 8].fill(0);
        let header_crc = CRC32.checksum(&scrubbed);
        bytes[METADATA_CRC_OFFSET..METADATA_CRC_OFFSET + 4]
            .copy_from_slice(&header_crc.to_le_bytes());

        bytes
    }

    /// Build and write the package to `path`.
    pub fn write_to(self, path: &Path) -> VmgResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build_bytes())?;
        Ok(())
    }
}
