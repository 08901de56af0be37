//! vmgd - VMG OTA gateway daemon
//!
//! Vehicle-side gateway between the OEM backend (HTTP + MQTT) and the
//! in-vehicle Zone Gateways (DoIP/UDS). Advertises readiness, collects VCI,
//! and runs OTA campaigns: vehicle-wide package distribution and the
//! gateway's own dual-partition self-update.
//!
//! Usage:
//!   vmgd [config.json]
//!
//! Without a config file the daemon runs with simulation defaults
//! (partitions as plain files under /tmp, mock fallback enabled).

mod commands;
mod mqtt;
mod readiness;
mod vci;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vmg_core::{CancelToken, VmgConfig, ZgwEndpoint};
use vmg_doip::DoipClient;
use vmg_ota::{OtaOrchestrator, PartitionManager};

use commands::{parse_command, Command, OtaCommand, PackageKind};
use mqtt::{InboundMessage, MqttLink, MqttProgressSink};
use readiness::ReadinessManager;
use vci::VciCollector;

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (JSON)
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let mut result = Args { config_path: None };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if !other.starts_with('-') => {
                result.config_path = Some(other.to_string());
            }
            other => {
                warn!("Unknown argument: {}", other);
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"vmgd - VMG OTA Gateway Daemon

Usage: vmgd [config.json]

Examples:
  # Run with simulation defaults (partitions under /tmp, mock fallback)
  vmgd

  # Run with a config file
  vmgd /etc/vmg/config.json
"#
    );
}

/// Simulation-mode configuration for running without a config file.
fn default_config() -> VmgConfig {
    serde_json::from_value(serde_json::json!({
        "server": { "host": "localhost" },
        "vehicle": {
            "vin": "KMHXX00XXXX000001",
            "model": "Genesis GV80",
            "model_year": 2024
        },
        "allow_mock_fallback": true
    }))
    .expect("built-in default config is valid")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmgd=info,vmg_ota=info,vmg_doip=info,vmg_package=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vmgd (VMG OTA gateway daemon)");

    let args = parse_args();
    let config = match args.config_path {
        Some(ref path) => {
            info!("Loading config from: {}", path);
            VmgConfig::load(path)?
        }
        None => {
            warn!("No config file provided, using simulation defaults");
            default_config()
        }
    };
    let config = Arc::new(config);

    // Partition manager and boot accounting: every start counts as a boot
    // attempt; three failed attempts flip the boot pointer back.
    let mut partitions = PartitionManager::new(&config.partitions);
    partitions.initialize()?;
    let boot_count = partitions.increment_boot_count()?;
    info!(boot_count, active = %partitions.active(), "boot attempt recorded");
    if partitions.is_rollback_needed() {
        warn!("boot attempt limit reached, rolling back to previous partition");
        partitions.perform_rollback()?;
    }

    // Backend messaging
    let (mqtt, commands_rx) = MqttLink::connect(&config);
    mqtt.subscribe(&config.command_topic()).await?;
    mqtt.subscribe(&config.campaign_topic()).await?;
    info!(
        command_topic = %config.command_topic(),
        campaign_topic = %config.campaign_topic(),
        "subscribed to backend topics"
    );

    let sink = Arc::new(MqttProgressSink::new(
        mqtt.clone(),
        config.ota_progress_topic(),
    ));
    let orchestrator = OtaOrchestrator::new(
        config.vehicle.clone(),
        config.ota.clone(),
        partitions,
        config.routing_table(),
        sink,
    );

    let http = reqwest::Client::new();
    let doip = DoipClient::new(ZgwEndpoint::new(
        config.zgw.ip.clone(),
        config.zgw.doip_port,
    ));

    let mut daemon = Daemon {
        vci: VciCollector::new(config.clone(), http),
        readiness: ReadinessManager::new(config.clone()),
        config,
        mqtt,
        commands: commands_rx,
        orchestrator,
        doip,
        heartbeat_seq: 0,
        shutdown: false,
    };

    // Subsystems are up: this boot attempt succeeded
    daemon.orchestrator.partitions_mut().reset_boot_count()?;

    daemon.run().await
}

struct Daemon {
    config: Arc<VmgConfig>,
    mqtt: MqttLink,
    commands: mpsc::UnboundedReceiver<InboundMessage>,
    orchestrator: OtaOrchestrator,
    doip: DoipClient,
    vci: VciCollector,
    readiness: ReadinessManager,
    heartbeat_seq: u64,
    shutdown: bool,
}

impl Daemon {
    async fn run(&mut self) -> anyhow::Result<()> {
        info!("entering main loop");
        let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
        heartbeat.tick().await; // the first tick fires immediately

        while !self.shutdown {
            tokio::select! {
                maybe = self.commands.recv() => {
                    let Some(message) = maybe else { break };
                    if let Err(e) = self.handle_message(message).await {
                        error!(error = %e, "command handling failed");
                    }
                }
                _ = heartbeat.tick() => {
                    self.publish_heartbeat().await;
                }
            }
        }

        info!("vmgd shut down");
        Ok(())
    }

    async fn handle_message(&mut self, message: InboundMessage) -> anyhow::Result<()> {
        let command = match parse_command(&message.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping unparseable command");
                return Ok(());
            }
        };

        match command {
            Command::CollectVci { reason } => {
                let trigger = reason.as_deref().unwrap_or("external_request");
                self.vci
                    .collect_and_upload(&mut self.doip, trigger)
                    .await?;
                self.publish_event("vci_collected").await?;
            }
            Command::CollectReadiness { reason } => {
                let trigger = reason.as_deref().unwrap_or("external_request");
                self.readiness
                    .check_and_publish(&mut self.doip, &self.mqtt, trigger)
                    .await?;
            }
            Command::StartOta(ota) => {
                self.run_ota(ota).await?;
            }
            Command::CancelOta => {
                info!("no OTA in progress, cancel ignored");
            }
            Command::Shutdown => {
                info!("shutdown requested by backend");
                self.shutdown = true;
            }
        }
        Ok(())
    }

    /// Drive one OTA campaign to completion while still honoring a
    /// `cancel_ota` command arriving mid-flight.
    async fn run_ota(&mut self, ota: OtaCommand) -> anyhow::Result<()> {
        info!(
            campaign = %ota.campaign_id,
            kind = ?ota.package_type,
            size = ota.package_size,
            "OTA campaign requested"
        );

        let package = ota.to_package_info();
        let cancel = CancelToken::new();

        let orchestrator = &mut self.orchestrator;
        let commands = &mut self.commands;

        let ota_future = async {
            match ota.package_type {
                PackageKind::Vehicle => orchestrator.start_vehicle_ota(&package, &cancel).await,
                PackageKind::SelfUpdate => {
                    orchestrator.start_self_ota(&package, &cancel).await?;
                    orchestrator.acknowledge().await
                }
            }
        };
        tokio::pin!(ota_future);

        let result = loop {
            tokio::select! {
                result = &mut ota_future => break result,
                maybe = commands.recv() => {
                    if let Some(message) = maybe {
                        match parse_command(&message.payload) {
                            Ok(Command::CancelOta) => {
                                warn!("cancelling OTA on backend request");
                                cancel.cancel();
                            }
                            Ok(_) => warn!("command ignored while OTA in progress"),
                            Err(e) => warn!(error = %e, "invalid command during OTA"),
                        }
                    }
                }
            }
        };

        match result {
            Ok(()) => info!(campaign = %package.campaign_id, "OTA campaign finished"),
            // The orchestrator already emitted the final error report
            Err(e) => error!(campaign = %package.campaign_id, error = %e, "OTA campaign failed"),
        }
        Ok(())
    }

    async fn publish_event(&self, event: &str) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "device_id": self.config.device.device_id,
            "event": event,
            "timestamp": chrono::Utc::now().timestamp(),
        });
        self.mqtt
            .publish(&self.config.status_topic(), payload.to_string())
            .await
    }

    async fn publish_heartbeat(&mut self) {
        self.heartbeat_seq += 1;
        let payload = serde_json::json!({
            "device_id": self.config.device.device_id,
            "sw_version": self.config.device.sw_version,
            "seq": self.heartbeat_seq,
            "ota_state": self.orchestrator.state().code(),
            "timestamp": chrono::Utc::now().timestamp(),
        });
        if let Err(e) = self
            .mqtt
            .publish(&self.config.status_topic(), payload.to_string())
            .await
        {
            warn!(error = %e, "heartbeat publish failed");
        }
    }
}
