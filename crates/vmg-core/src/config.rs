//! Gateway configuration
//!
//! Loaded from a JSON document at startup. Every section has serde defaults
//! so a minimal config (VIN + server host) is enough to boot in simulation
//! mode.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VmgError, VmgResult};
use crate::routing::{ZoneRoute, ZoneRoutingTable};

/// Top-level VMG configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmgConfig {
    pub server: ServerConfig,
    pub vehicle: VehicleConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub zgw: ZgwConfig,
    #[serde(default)]
    pub partitions: PartitionConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Zone routing rules; the built-in table applies when absent
    #[serde(default)]
    pub routing: Option<Vec<ZoneRoute>>,
    /// Permit mock VCI/readiness data when the ZGW is unreachable.
    /// Development aid only; never enable in production.
    #[serde(default)]
    pub allow_mock_fallback: bool,
}

/// Backend server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_http_port() -> u16 {
    8080
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_api_base() -> String {
    "/api/v1".into()
}

/// Vehicle identity, matched against Vehicle Package headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub vin: String,
    pub model: String,
    pub model_year: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sw_version")]
    pub sw_version: String,
}

fn default_device_id() -> String {
    "vmg_001".into()
}

fn default_sw_version() -> String {
    "1.0.0".into()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sw_version: default_sw_version(),
        }
    }
}

/// Primary Zone Gateway (VCI / readiness queries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZgwConfig {
    #[serde(default = "default_zgw_ip")]
    pub ip: String,
    #[serde(default = "default_doip_port")]
    pub doip_port: u16,
}

fn default_zgw_ip() -> String {
    "192.168.1.10".into()
}

fn default_doip_port() -> u16 {
    13400
}

impl Default for ZgwConfig {
    fn default() -> Self {
        Self {
            ip: default_zgw_ip(),
            doip_port: default_doip_port(),
        }
    }
}

/// Dual-partition layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default = "default_partition_a")]
    pub a_path: String,
    #[serde(default = "default_partition_b")]
    pub b_path: String,
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default = "default_boot_status_path")]
    pub boot_status_path: String,
    /// Simulation mode uses plain files instead of block devices
    #[serde(default = "default_true")]
    pub simulation_mode: bool,
}

fn default_partition_a() -> String {
    "/tmp/vmg_partitions/partition_a".into()
}

fn default_partition_b() -> String {
    "/tmp/vmg_partitions/partition_b".into()
}

fn default_data_path() -> String {
    "/tmp/vmg_partitions/data".into()
}

fn default_boot_status_path() -> String {
    "/tmp/vmg_partitions/data/boot_status.dat".into()
}

fn default_true() -> bool {
    true
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            a_path: default_partition_a(),
            b_path: default_partition_b(),
            data_path: default_data_path(),
            boot_status_path: default_boot_status_path(),
            simulation_mode: true,
        }
    }
}

/// OTA download/install paths and transfer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    #[serde(default = "default_download_path")]
    pub download_path: String,
    #[serde(default = "default_install_path")]
    pub install_path: String,
    /// HTTP Range chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Per-chunk retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_download_path() -> String {
    "/tmp/vmg_partitions/data/ota/downloads".into()
}

fn default_install_path() -> String {
    "/tmp/vmg_partitions/data/ota/install".into()
}

fn default_chunk_size() -> u64 {
    64 * 1024
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            install_path: default_install_path(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
        }
    }
}

/// Thresholds for the OTA readiness evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_min_battery")]
    pub min_battery_percent: u8,
    #[serde(default = "default_min_free_space")]
    pub min_free_space_mb: u32,
    #[serde(default = "default_max_temperature")]
    pub max_temperature_c: i32,
    #[serde(default = "default_true")]
    pub check_engine_off: bool,
    #[serde(default = "default_true")]
    pub check_parking_brake: bool,
    #[serde(default = "default_true")]
    pub check_network_stable: bool,
}

fn default_min_battery() -> u8 {
    50
}

fn default_min_free_space() -> u32 {
    512
}

fn default_max_temperature() -> i32 {
    60
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_battery_percent: default_min_battery(),
            min_free_space_mb: default_min_free_space(),
            max_temperature_c: default_max_temperature(),
            check_engine_off: true,
            check_parking_brake: true,
            check_network_stable: true,
        }
    }
}

impl VmgConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> VmgResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VmgError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| VmgError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Base URL for backend HTTP requests, e.g. `http://oem.example:8080/api/v1`
    pub fn http_base_url(&self) -> String {
        let scheme = if self.server.use_https { "https" } else { "http" };
        format!(
            "{}://{}:{}{}",
            scheme, self.server.host, self.server.http_port, self.server.api_base
        )
    }

    pub fn ota_progress_topic(&self) -> String {
        format!("oem/{}/ota/progress", self.vehicle.vin)
    }

    pub fn command_topic(&self) -> String {
        format!("oem/{}/command", self.vehicle.vin)
    }

    pub fn campaign_topic(&self) -> String {
        format!("oem/{}/ota/campaign", self.vehicle.vin)
    }

    pub fn status_topic(&self) -> String {
        format!("oem/{}/status", self.vehicle.vin)
    }

    pub fn readiness_topic(&self) -> String {
        format!("oem/{}/readiness", self.vehicle.vin)
    }

    pub fn vci_topic(&self) -> String {
        format!("oem/{}/vci", self.vehicle.vin)
    }

    /// Routing table from config, or the built-in default.
    pub fn routing_table(&self) -> ZoneRoutingTable {
        match &self.routing {
            Some(rules) if !rules.is_empty() => ZoneRoutingTable::new(rules.clone()),
            _ => ZoneRoutingTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_json() -> &'static str {
        r#"{
            "server": { "host": "oem.example.com" },
            "vehicle": { "vin": "KMHXX00XXXX000001", "model": "GV80", "model_year": 2025 }
        }"#
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config: VmgConfig = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.ota.chunk_size, 64 * 1024);
        assert_eq!(config.ota.max_retries, 3);
        assert!(config.partitions.simulation_mode);
        assert!(!config.allow_mock_fallback);
        assert_eq!(
            config.ota_progress_topic(),
            "oem/KMHXX00XXXX000001/ota/progress"
        );
        assert_eq!(config.http_base_url(), "http://oem.example.com:8080/api/v1");
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = VmgConfig::load("/nonexistent/vmg.json").unwrap_err();
        assert_eq!(err.kind_str(), "config");
    }

    #[test]
    fn load_roundtrips_through_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_json().as_bytes()).unwrap();
        let config = VmgConfig::load(file.path()).unwrap();
        assert_eq!(config.vehicle.model, "GV80");
        assert_eq!(config.routing_table().resolve(2).host, "192.168.1.10");
    }
}
