//! VCI collection and upload
//!
//! Runs the 0xF001/0xF002 routine pair against the primary ZGW, converts the
//! binary records to the backend's JSON shape and POSTs them. The mock-data
//! fallback only engages when `allow_mock_fallback` is set in the config;
//! production deployments surface the DoIP failure instead.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use vmg_core::{VmgConfig, VmgError, VmgResult};
use vmg_doip::{DoipClient, VciInfo};

pub struct VciCollector {
    config: Arc<VmgConfig>,
    http: reqwest::Client,
}

impl VciCollector {
    pub fn new(config: Arc<VmgConfig>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Collect VCI from the ZGW and upload it to the backend. Returns the
    /// uploaded document.
    pub async fn collect_and_upload(
        &self,
        doip: &mut DoipClient,
        trigger: &str,
    ) -> anyhow::Result<Value> {
        info!(trigger, "collecting VCI");

        let (ecus, source) = match self.query_zgw(doip).await {
            Ok(records) => (serde_json::to_value(&records)?, trigger.to_string()),
            Err(e) if self.config.allow_mock_fallback => {
                warn!(error = %e, "VCI query failed, using mock fallback");
                (mock_ecus(), format!("{}_mock", trigger))
            }
            Err(e) => return Err(e.into()),
        };

        let document = json!({
            "device_id": self.config.device.device_id,
            "vin": self.config.vehicle.vin,
            "timestamp": chrono::Utc::now().timestamp(),
            "trigger": source,
            "ecus": ecus,
        });

        self.upload(&document).await?;
        Ok(document)
    }

    async fn query_zgw(&self, doip: &mut DoipClient) -> VmgResult<Vec<VciInfo>> {
        if !doip.is_active() {
            doip.connect().await?;
        }
        doip.request_vci_collection().await?;
        let records = doip.request_vci_report().await?;
        if records.is_empty() {
            return Err(VmgError::Protocol("empty VCI report".into()));
        }
        Ok(records)
    }

    async fn upload(&self, document: &Value) -> anyhow::Result<()> {
        let url = format!(
            "{}/vehicles/{}/vci",
            self.config.http_base_url(),
            self.config.vehicle.vin
        );

        let response = self.http.post(&url).json(document).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("VCI upload rejected with status {}", response.status());
        }

        info!(%url, "VCI uploaded");
        Ok(())
    }
}

fn mock_ecus() -> Value {
    json!([
        { "ecu_id": "ECU_011", "sw_version": "1.1.2", "hw_version": "2.0", "serial_number": "091000001" },
        { "ecu_id": "ECU_021", "sw_version": "1.0.5", "hw_version": "1.5", "serial_number": "091000002" },
        { "ecu_id": "ECU_031", "sw_version": "2.3.1", "hw_version": "3.0", "serial_number": "091000003" }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ecu_list_has_expected_shape() {
        let ecus = mock_ecus();
        let list = ecus.as_array().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0]["ecu_id"], "ECU_011");
        assert_eq!(list[0]["sw_version"], "1.1.2");
    }
}
