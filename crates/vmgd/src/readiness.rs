//! OTA readiness evaluation
//!
//! Runs the 0xF003/0xF004 routine pair, aggregates the per-ECU records into
//! a worst-case vehicle snapshot and checks it against the configured
//! thresholds. Battery percentage uses the fleet's linear 11.0 V = 0 % /
//! 12.0 V = 100 % mapping.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use vmg_core::{VmgConfig, VmgError, VmgResult};
use vmg_doip::{DoipClient, ReadinessInfo};

use crate::mqtt::MqttLink;

pub struct ReadinessManager {
    config: Arc<VmgConfig>,
}

/// Aggregated worst-case snapshot across all reporting ECUs
#[derive(Debug, Clone)]
struct Snapshot {
    battery_percent: u8,
    free_space_mb: u32,
    engine_off: bool,
    parked: bool,
    all_ready: bool,
    ecus: Value,
}

impl ReadinessManager {
    pub fn new(config: Arc<VmgConfig>) -> Self {
        Self { config }
    }

    /// Query the ZGW, evaluate, publish the result. Returns the verdict.
    pub async fn check_and_publish(
        &self,
        doip: &mut DoipClient,
        mqtt: &MqttLink,
        trigger: &str,
    ) -> anyhow::Result<bool> {
        info!(trigger, "checking OTA readiness");

        let (snapshot, source) = match self.query_zgw(doip).await {
            Ok(records) => (self.aggregate(&records), trigger.to_string()),
            Err(e) if self.config.allow_mock_fallback => {
                warn!(error = %e, "readiness query failed, using mock fallback");
                (mock_snapshot(), format!("{}_mock", trigger))
            }
            Err(e) => return Err(e.into()),
        };

        let ready = self.evaluate(&snapshot);
        let document = json!({
            "device_id": self.config.device.device_id,
            "vin": self.config.vehicle.vin,
            "timestamp": chrono::Utc::now().timestamp(),
            "trigger": source,
            "ready": ready,
            "battery_percent": snapshot.battery_percent,
            "free_space_mb": snapshot.free_space_mb,
            "engine_off": snapshot.engine_off,
            "parking_brake": snapshot.parked,
            "ecus": snapshot.ecus,
        });

        mqtt.publish(&self.config.readiness_topic(), document.to_string())
            .await?;

        info!(ready, "readiness published");
        Ok(ready)
    }

    async fn query_zgw(&self, doip: &mut DoipClient) -> VmgResult<Vec<ReadinessInfo>> {
        if !doip.is_active() {
            doip.connect().await?;
        }
        doip.request_readiness_check().await?;
        let records = doip.request_readiness_report().await?;
        if records.is_empty() {
            return Err(VmgError::Protocol("empty readiness report".into()));
        }
        Ok(records)
    }

    /// Worst case across ECUs: minimum battery and memory, every flag ANDed.
    fn aggregate(&self, records: &[ReadinessInfo]) -> Snapshot {
        let mut battery_percent: u8 = 100;
        let mut free_space_mb: u32 = u32::MAX;
        let mut engine_off = true;
        let mut parked = true;
        let mut all_ready = true;
        let mut ecus = Vec::new();

        for info in records {
            let percent = battery_percent_from_mv(info.battery_voltage_mv);
            let memory_mb = info.available_memory_kb / 1024;

            battery_percent = battery_percent.min(percent);
            free_space_mb = free_space_mb.min(memory_mb);
            engine_off &= info.engine_off;
            parked &= info.vehicle_parked;
            all_ready &= info.ready_for_update && info.compatible;

            ecus.push(json!({
                "ecu_id": info.ecu_id,
                "battery_voltage_mv": info.battery_voltage_mv,
                "battery_percent": percent,
                "available_memory_kb": info.available_memory_kb,
                "vehicle_parked": info.vehicle_parked,
                "engine_off": info.engine_off,
                "all_doors_closed": info.all_doors_closed,
                "sw_compatible": info.compatible,
                "ready_for_update": info.ready_for_update,
            }));
        }

        Snapshot {
            battery_percent,
            free_space_mb,
            engine_off,
            parked,
            all_ready,
            ecus: Value::Array(ecus),
        }
    }

    fn evaluate(&self, snapshot: &Snapshot) -> bool {
        let thresholds = &self.config.readiness;
        let mut ready = snapshot.all_ready;

        if snapshot.battery_percent < thresholds.min_battery_percent {
            warn!(battery = snapshot.battery_percent, "battery too low for OTA");
            ready = false;
        }
        if snapshot.free_space_mb < thresholds.min_free_space_mb {
            warn!(free_mb = snapshot.free_space_mb, "insufficient storage for OTA");
            ready = false;
        }
        if thresholds.check_engine_off && !snapshot.engine_off {
            warn!("engine must be off for OTA");
            ready = false;
        }
        if thresholds.check_parking_brake && !snapshot.parked {
            warn!("vehicle must be parked for OTA");
            ready = false;
        }

        ready
    }
}

/// Linear mapping: 11.0 V -> 0 %, 12.0 V -> 100 %.
fn battery_percent_from_mv(mv: u16) -> u8 {
    ((i32::from(mv) - 11_000) / 10).clamp(0, 100) as u8
}

fn mock_snapshot() -> Snapshot {
    Snapshot {
        battery_percent: 85,
        free_space_mb: 2048,
        engine_off: true,
        parked: true,
        all_ready: true,
        ecus: json!([]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<VmgConfig> {
        Arc::new(
            serde_json::from_str(
                r#"{
                    "server": { "host": "localhost" },
                    "vehicle": { "vin": "KMHXX00XXXX000001", "model": "GV80", "model_year": 2025 }
                }"#,
            )
            .unwrap(),
        )
    }

    fn record(mv: u16, memory_kb: u32, ready: bool) -> ReadinessInfo {
        ReadinessInfo {
            ecu_id: "ECU_011".into(),
            vehicle_parked: true,
            engine_off: true,
            battery_voltage_mv: mv,
            available_memory_kb: memory_kb,
            all_doors_closed: true,
            compatible: true,
            ready_for_update: ready,
        }
    }

    #[test]
    fn battery_mapping_is_clamped() {
        assert_eq!(battery_percent_from_mv(10_500), 0);
        assert_eq!(battery_percent_from_mv(11_000), 0);
        assert_eq!(battery_percent_from_mv(11_500), 50);
        assert_eq!(battery_percent_from_mv(12_000), 100);
        assert_eq!(battery_percent_from_mv(14_400), 100);
    }

    #[test]
    fn aggregation_takes_the_worst_case() {
        let manager = ReadinessManager::new(config());
        let snapshot = manager.aggregate(&[
            record(12_600, 4 * 1024 * 1024, true),
            record(11_600, 600 * 1024, true),
        ]);
        assert_eq!(snapshot.battery_percent, 60);
        assert_eq!(snapshot.free_space_mb, 600);
        assert!(manager.evaluate(&snapshot));
    }

    #[test]
    fn low_battery_fails_evaluation() {
        let manager = ReadinessManager::new(config());
        let snapshot = manager.aggregate(&[record(11_200, 4 * 1024 * 1024, true)]);
        assert_eq!(snapshot.battery_percent, 20);
        assert!(!manager.evaluate(&snapshot));
    }

    #[test]
    fn unready_ecu_fails_evaluation() {
        let manager = ReadinessManager::new(config());
        let snapshot = manager.aggregate(&[record(12_600, 4 * 1024 * 1024, false)]);
        assert!(!manager.evaluate(&snapshot));
    }
}
