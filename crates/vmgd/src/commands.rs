//! Backend command messages
//!
//! Commands arrive as JSON on `oem/<vin>/command` (and OTA campaigns on
//! `oem/<vin>/ota/campaign`). Unknown commands are logged and dropped by the
//! caller.

use serde::Deserialize;
use vmg_core::OtaPackageInfo;

/// Command envelope, tagged by the `command` field
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CollectVci {
        #[serde(default)]
        reason: Option<String>,
    },
    CollectReadiness {
        #[serde(default)]
        reason: Option<String>,
    },
    StartOta(OtaCommand),
    CancelOta,
    Shutdown,
}

/// Which update flow a campaign drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Three-layer Vehicle Package fanned out to the ZGWs
    #[default]
    Vehicle,
    /// Flat image for the gateway's own partitions
    #[serde(rename = "self")]
    SelfUpdate,
}

/// Payload of a `start_ota` command
#[derive(Debug, Deserialize)]
pub struct OtaCommand {
    pub campaign_id: String,
    pub package_url: String,
    pub package_size: u64,
    #[serde(default)]
    pub firmware_version: u32,
    pub sha256_hash: String,
    #[serde(default)]
    pub package_type: PackageKind,
}

impl OtaCommand {
    pub fn to_package_info(&self) -> OtaPackageInfo {
        OtaPackageInfo {
            campaign_id: self.campaign_id.clone(),
            package_url: self.package_url.clone(),
            package_size: self.package_size,
            firmware_version: self.firmware_version,
            sha256_hash: self.sha256_hash.clone(),
            target_partition: None,
        }
    }
}

/// Parse a command payload.
pub fn parse_command(payload: &str) -> anyhow::Result<Command> {
    serde_json::from_str(payload).map_err(|e| anyhow::anyhow!("invalid command: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_vci_with_reason() {
        let cmd = parse_command(r#"{"command": "collect_vci", "reason": "power_on"}"#).unwrap();
        match cmd {
            Command::CollectVci { reason } => assert_eq!(reason.as_deref(), Some("power_on")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn start_ota_carries_package_info() {
        let cmd = parse_command(
            r#"{
                "command": "start_ota",
                "campaign_id": "campaign_2024_11",
                "package_url": "http://oem.example/packages/campaign_2024_11.bin",
                "package_size": 10485760,
                "firmware_version": 16908291,
                "sha256_hash": "aa00000000000000000000000000000000000000000000000000000000000bb0",
                "package_type": "vehicle"
            }"#,
        )
        .unwrap();

        match cmd {
            Command::StartOta(ota) => {
                assert_eq!(ota.package_type, PackageKind::Vehicle);
                let info = ota.to_package_info();
                assert_eq!(info.campaign_id, "campaign_2024_11");
                assert_eq!(info.package_size, 10_485_760);
                assert_eq!(info.firmware_version, 0x0102_0003);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn self_update_package_type() {
        let cmd = parse_command(
            r#"{
                "command": "start_ota",
                "campaign_id": "vmg_fw_2",
                "package_url": "http://oem.example/vmg.bin",
                "package_size": 1024,
                "sha256_hash": "00",
                "package_type": "self"
            }"#,
        )
        .unwrap();
        match cmd {
            Command::StartOta(ota) => assert_eq!(ota.package_type, PackageKind::SelfUpdate),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_command(r#"{"command": "reboot"}"#).is_err());
        assert!(parse_command("not json").is_err());
    }
}
