//! OTA orchestrator
//!
//! Owns the current OTA transaction: lifecycle state, the downloaded file,
//! the parser instance, the partition manager, and the per-endpoint DoIP
//! client cache. Zones are delivered strictly sequentially; cancellation is
//! checked between coarse steps through the token the caller passes in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use vmg_core::config::{OtaConfig, VehicleConfig};
use vmg_core::{
    CancelToken, OtaPackageInfo, OtaState, ProgressEvent, ProgressReport, ProgressSink, VmgError,
    VmgResult, ZgwEndpoint, ZoneRoutingTable,
};
use vmg_doip::DoipClient;
use vmg_package::{VehiclePackageParser, ZonePackageParser};

use crate::download::{decode_sha256_hex, fetch_chunk, sha256_file};
use crate::partition::{PartitionManager, PartitionMetadata, PartitionState};

/// Progress is pushed to the backend whenever the percentage crosses this
/// boundary during a download.
const PROGRESS_REPORT_STEP: u8 = 5;

/// Drives the self-update and vehicle-update flows
pub struct OtaOrchestrator {
    vehicle: VehicleConfig,
    ota: OtaConfig,
    partitions: PartitionManager,
    routing: ZoneRoutingTable,
    sink: Arc<dyn ProgressSink>,
    http: reqwest::Client,
    /// DoIP clients keyed by endpoint so two zones behind the same ZGW share
    /// one connection
    clients: HashMap<ZgwEndpoint, DoipClient>,
    state: OtaState,
    progress: ProgressReport,
    last_reported_pct: u8,
}

impl OtaOrchestrator {
    pub fn new(
        vehicle: VehicleConfig,
        ota: OtaConfig,
        partitions: PartitionManager,
        routing: ZoneRoutingTable,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            vehicle,
            ota,
            partitions,
            routing,
            sink,
            http: reqwest::Client::new(),
            clients: HashMap::new(),
            state: OtaState::Idle,
            progress: ProgressReport::default(),
            last_reported_pct: 0,
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.in_progress()
    }

    /// Snapshot of the latest progress.
    pub fn progress(&self) -> ProgressReport {
        self.progress.clone()
    }

    pub fn partitions(&self) -> &PartitionManager {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut PartitionManager {
        &mut self.partitions
    }

    /// Self-update: download a flat gateway image, verify its SHA-256,
    /// install it to the standby partition and switch the boot target.
    pub async fn start_self_ota(
        &mut self,
        info: &OtaPackageInfo,
        cancel: &CancelToken,
    ) -> VmgResult<()> {
        self.begin(info)?;
        info!(campaign = %info.campaign_id, size = info.package_size, "starting self OTA");

        match self.run_self(info, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Vehicle update: download a Vehicle Package, verify and split it, and
    /// push each Zone Package to its ZGW over UDS block transfer.
    pub async fn start_vehicle_ota(
        &mut self,
        info: &OtaPackageInfo,
        cancel: &CancelToken,
    ) -> VmgResult<()> {
        self.begin(info)?;
        info!(campaign = %info.campaign_id, size = info.package_size, "starting vehicle OTA");

        match self.run_vehicle(info, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Caller acknowledgement after a successful self-update: READY → COMPLETED.
    pub async fn acknowledge(&mut self) -> VmgResult<()> {
        if self.state != OtaState::Ready {
            return Err(VmgError::State(format!(
                "acknowledge only legal in READY, current state {:?}",
                self.state
            )));
        }
        self.set_state(OtaState::Completed, "OTA acknowledged").await;
        Ok(())
    }

    fn begin(&mut self, info: &OtaPackageInfo) -> VmgResult<()> {
        if self.is_in_progress() {
            return Err(VmgError::State("OTA already in progress".into()));
        }
        self.state = OtaState::Idle;
        self.progress = ProgressReport {
            state: OtaState::Idle.code(),
            total_bytes: info.package_size,
            ..Default::default()
        };
        self.last_reported_pct = 0;
        Ok(())
    }

    async fn run_self(&mut self, info: &OtaPackageInfo, cancel: &CancelToken) -> VmgResult<()> {
        let package_path = self.download_package(info, cancel).await?;
        cancel.check()?;

        self.set_state(OtaState::Verifying, "Verifying package integrity")
            .await;
        let expected = decode_sha256_hex(&info.sha256_hash)?;
        let actual = sha256_file(&package_path)?;
        if actual != expected {
            return Err(VmgError::Integrity("package SHA-256 mismatch".into()));
        }
        cancel.check()?;

        self.set_state(OtaState::Installing, "Installing to standby partition")
            .await;
        let standby = self.partitions.standby();
        self.partitions.set_state(standby, PartitionState::Updating)?;

        let metadata = PartitionMetadata {
            firmware_version: info.firmware_version,
            build_timestamp: chrono::Utc::now().timestamp().max(0) as u32,
            total_size: info.package_size as u32,
            sha256: expected,
            state: PartitionState::Ready,
        };

        let install = self
            .partitions
            .install_firmware(standby, &package_path, &metadata)
            .and_then(|_| self.partitions.verify_partition(standby));
        if let Err(e) = install {
            let _ = self.partitions.set_state(standby, PartitionState::Error);
            return Err(e);
        }

        self.partitions.set_state(standby, PartitionState::Ready)?;
        self.partitions.switch_boot_target(standby)?;

        self.set_state(OtaState::Ready, "OTA completed, reboot required")
            .await;
        Ok(())
    }

    async fn run_vehicle(&mut self, info: &OtaPackageInfo, cancel: &CancelToken) -> VmgResult<()> {
        let package_path = self.download_package(info, cancel).await?;
        cancel.check()?;

        self.set_state(OtaState::Verifying, "Verifying Vehicle Package")
            .await;
        let mut parser = VehiclePackageParser::new(&package_path);
        parser.parse(&self.routing)?;
        parser.verify()?;
        parser.verify_target(
            &self.vehicle.vin,
            &self.vehicle.model,
            self.vehicle.model_year,
        )?;
        cancel.check()?;

        self.set_state(OtaState::Installing, "Extracting Zone Packages")
            .await;
        let zones_dir = Path::new(&self.ota.download_path).join("zones");
        parser.extract_all(&zones_dir)?;

        let zones = parser.zones().to_vec();
        let zone_count = zones.len();
        for (index, zone) in zones.iter().enumerate() {
            cancel.check()?;

            info!(
                zone = zone.zone_number,
                zone_id = %zone.zone_id,
                target = %zone.target,
                ecus = zone.ecu_count,
                "delivering zone package"
            );

            let zone_path = zone.extracted_path.clone().ok_or_else(|| {
                VmgError::State(format!("zone {} was not extracted", zone.zone_number))
            })?;

            // Zone integrity is checked before any byte leaves the gateway
            let mut zone_parser = ZonePackageParser::new(&zone_path);
            zone_parser.parse()?;
            zone_parser.verify()?;

            let zone_bytes = std::fs::read(&zone_path)?;
            let client = self
                .clients
                .entry(zone.target.clone())
                .or_insert_with(|| DoipClient::new(zone.target.clone()));
            if !client.is_active() {
                client.connect().await?;
            }
            client
                .send_firmware(&zone.zone_id, &zone_bytes, cancel)
                .await?;

            let delivered = index + 1;
            self.progress.percentage = (delivered * 100 / zone_count) as u8;
            self.progress.current_step =
                format!("Zone {} delivered ({}/{})", zone.zone_number, delivered, zone_count);
            self.sink.publish(&self.progress).await;
        }

        self.set_state(OtaState::Completed, "All Zone Packages sent to ZGWs")
            .await;
        Ok(())
    }

    /// Shared chunked download step. Leaves the partial file in place on
    /// every failure path.
    async fn download_package(
        &mut self,
        info: &OtaPackageInfo,
        cancel: &CancelToken,
    ) -> VmgResult<PathBuf> {
        self.set_state(OtaState::Downloading, "Downloading OTA package")
            .await;

        std::fs::create_dir_all(&self.ota.download_path)?;
        let dest = Path::new(&self.ota.download_path).join(format!("{}.bin", info.campaign_id));
        let mut file = tokio::fs::File::create(&dest).await?;

        let total = info.package_size;
        let mut downloaded: u64 = 0;
        while downloaded < total {
            cancel.check()?;

            let end = (downloaded + self.ota.chunk_size - 1).min(total - 1);
            let chunk = fetch_chunk(
                &self.http,
                &info.package_url,
                downloaded,
                end,
                self.ota.max_retries,
            )
            .await?;
            if chunk.is_empty() {
                return Err(VmgError::Protocol("server returned an empty chunk".into()));
            }

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.report_bytes(downloaded.min(total), total).await;
        }
        file.flush().await?;

        info!(path = %dest.display(), bytes = downloaded, "download completed");
        Ok(dest)
    }

    async fn report_bytes(&mut self, downloaded: u64, total: u64) {
        self.progress
            .apply(&ProgressEvent::Bytes { downloaded, total });

        if self.progress.percentage >= self.last_reported_pct + PROGRESS_REPORT_STEP {
            self.last_reported_pct = self.progress.percentage;
            self.sink.publish(&self.progress).await;
        }
    }

    async fn set_state(&mut self, state: OtaState, step: &str) {
        self.state = state;
        self.progress.apply(&ProgressEvent::StateChange {
            state,
            step: step.to_string(),
        });
        info!(?state, step, "OTA state change");
        self.sink.publish(&self.progress).await;
    }

    /// Single transition to ERROR: close in-flight DoIP sockets, stamp the
    /// error kind into the report, emit it one final time.
    async fn fail(&mut self, err: &VmgError) {
        for client in self.clients.values_mut() {
            client.disconnect();
        }

        if matches!(err, VmgError::Cancelled) {
            warn!("OTA cancelled");
        } else {
            error!(error = %err, "OTA failed");
        }

        self.state = OtaState::Error;
        self.progress.apply(&ProgressEvent::Failed {
            kind: err.kind_str(),
            message: err.to_string(),
        });
        self.sink.publish(&self.progress).await;
    }
}
