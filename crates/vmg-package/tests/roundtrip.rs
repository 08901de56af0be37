//! Producer/parser round-trip tests for the three-layer package format

use std::path::PathBuf;

use tempfile::TempDir;
use vmg_core::{VmgError, ZoneRoutingTable};
use vmg_package::{
    EcuMetadata, EcuPackageBuilder, VehiclePackageBuilder, VehiclePackageParser,
    ZonePackageBuilder, ZonePackageParser, ECU_METADATA_LEN,
};

const VIN: &str = "KMHXX00XXXX000001";
const MODEL: &str = "Genesis GV80";
const YEAR: u16 = 2024;

fn sample_package() -> VehiclePackageBuilder {
    VehiclePackageBuilder::new(VIN, MODEL, YEAR)
        .region(3)
        .master_sw("v2.0.0")
        .zone(
            ZonePackageBuilder::new(1, "Zone_Front")
                .zone_name("Zone_Front_Left")
                .timestamp(1_731_800_000)
                .ecu(
                    EcuPackageBuilder::new("ECU_011")
                        .version("v2.0.1")
                        .firmware(vec![0x11; 4096]),
                )
                .ecu(
                    EcuPackageBuilder::new("ECU_012")
                        .version("v1.5.0")
                        .priority(1)
                        .firmware(vec![0x12; 2048]),
                ),
        )
        .zone(
            ZonePackageBuilder::new(9, "Zone_Gateway")
                .zone_name("Zone_Central_Gateway")
                .ecu(
                    EcuPackageBuilder::new("ECU_091")
                        .version("v2.0.0")
                        .priority(10)
                        .firmware(vec![0x91; 8192]),
                ),
        )
}

fn write_sample(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("vehicle_package.bin");
    sample_package().write_to(&path).unwrap();
    path
}

#[test]
fn parse_verify_and_target_check_succeed() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let mut parser = VehiclePackageParser::new(&path);
    let header = parser.parse(&ZoneRoutingTable::default()).unwrap();

    assert_eq!(header.vin, VIN);
    assert_eq!(header.model, MODEL);
    assert_eq!(header.model_year, YEAR);
    assert_eq!(header.zone_count, 2);
    assert_eq!(header.total_ecu_count, 3);
    assert_eq!(header.ecu_refs.len(), 3);
    assert_eq!(header.ecu_refs[0].ecu_id, "ECU_011");
    assert_eq!(header.ecu_refs[2].zone_number, 9);

    parser.verify().unwrap();
    parser.verify_target(VIN, MODEL, YEAR).unwrap();

    // Routing resolved per the default table
    let zones = parser.zones();
    assert_eq!(zones[0].target.host, "192.168.1.10");
    assert_eq!(zones[1].target.host, "192.168.1.12");
}

#[test]
fn extracted_zones_report_the_built_ecu_list() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();
    parser.verify().unwrap();

    let out_dir = dir.path().join("zones");
    parser.extract_all(&out_dir).unwrap();

    let expected: [(u8, &[&str]); 2] = [(1, &["ECU_011", "ECU_012"]), (9, &["ECU_091"])];
    for (zone_number, ecu_ids) in expected {
        let zone_path = out_dir.join(format!("zone_{}.bin", zone_number));
        assert!(zone_path.exists());

        let mut zone_parser = ZonePackageParser::new(&zone_path);
        let header = zone_parser.parse().unwrap();
        assert_eq!(header.zone_number, zone_number);
        zone_parser.verify().unwrap();
        assert_eq!(zone_parser.ecu_ids(), ecu_ids);
    }

    // Extraction recorded the output paths
    assert!(parser.zones().iter().all(|z| z.extracted_path.is_some()));
}

#[test]
fn ecu_metadata_inside_zone_verifies_firmware() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();
    let out_dir = dir.path().join("zones");
    parser.extract_all(&out_dir).unwrap();

    let zone_bytes = std::fs::read(out_dir.join("zone_1.bin")).unwrap();
    let mut zone_parser = ZonePackageParser::new(out_dir.join("zone_1.bin"));
    zone_parser.parse().unwrap();

    for entry in zone_parser.ecu_entries() {
        let start = entry.offset as usize;
        let metadata =
            EcuMetadata::parse(&zone_bytes[start..start + ECU_METADATA_LEN]).unwrap();
        assert_eq!(metadata.ecu_id, entry.ecu_id);
        assert_eq!(metadata.firmware_size, entry.firmware_size);

        let fw_start = start + entry.metadata_size as usize;
        let firmware = &zone_bytes[fw_start..fw_start + entry.firmware_size as usize];
        metadata.verify_firmware(firmware).unwrap();
    }
}

#[test]
fn single_corrupt_body_byte_fails_verification_only() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    // Flip one byte in the first zone's payload
    let mut bytes = std::fs::read(&path).unwrap();
    let target = 12 * 1024 + 2048;
    bytes[target] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();

    let err = parser.verify().unwrap_err();
    assert!(matches!(err, VmgError::Integrity(_)), "got {:?}", err);
    assert_eq!(err.kind_str(), "integrity");
}

#[test]
fn wrong_vin_is_a_target_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("package.bin");
    VehiclePackageBuilder::new("KMHXX11111111111", MODEL, YEAR)
        .zone(
            ZonePackageBuilder::new(1, "Zone_Front")
                .ecu(EcuPackageBuilder::new("ECU_011").firmware(vec![1, 2, 3])),
        )
        .write_to(&path)
        .unwrap();

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();
    parser.verify().unwrap();

    let err = parser
        .verify_target("KMHXX22222222222", MODEL, YEAR)
        .unwrap_err();
    assert_eq!(err.kind_str(), "target_mismatch");
}

#[test]
fn zone_count_zero_fails_parse() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[128] = 0; // zone_count
    std::fs::write(&path, &bytes).unwrap();

    let mut parser = VehiclePackageParser::new(&path);
    let err = parser.parse(&ZoneRoutingTable::default()).unwrap_err();
    assert!(matches!(err, VmgError::Integrity(_)));
}

#[test]
fn duplicate_zone_numbers_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.bin");
    VehiclePackageBuilder::new(VIN, MODEL, YEAR)
        .zone(
            ZonePackageBuilder::new(2, "Zone_A")
                .ecu(EcuPackageBuilder::new("ECU_021").firmware(vec![1; 64])),
        )
        .zone(
            ZonePackageBuilder::new(2, "Zone_B")
                .ecu(EcuPackageBuilder::new("ECU_022").firmware(vec![2; 64])),
        )
        .write_to(&path)
        .unwrap();

    let mut parser = VehiclePackageParser::new(&path);
    let err = parser.parse(&ZoneRoutingTable::default()).unwrap_err();
    assert!(matches!(err, VmgError::Integrity(_)));
}

#[test]
fn truncated_package_fails_verify() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 100]).unwrap();

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();
    assert!(parser.verify().is_err());
}

#[test]
fn corrupt_zone_file_fails_zone_verify() {
    let dir = TempDir::new().unwrap();
    let path = write_sample(&dir);

    let mut parser = VehiclePackageParser::new(&path);
    parser.parse(&ZoneRoutingTable::default()).unwrap();
    let out_dir = dir.path().join("zones");
    parser.extract_all(&out_dir).unwrap();

    let zone_path = out_dir.join("zone_9.bin");
    let mut bytes = std::fs::read(&zone_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&zone_path, &bytes).unwrap();

    let mut zone_parser = ZonePackageParser::new(&zone_path);
    zone_parser.parse().unwrap();
    assert!(matches!(zone_parser.verify(), Err(VmgError::Integrity(_))));
}
