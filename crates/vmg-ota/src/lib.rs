//! vmg-ota - OTA orchestration
//!
//! Two update flows share one download/verify pipeline:
//!
//! ```text
//! start_self_ota      DOWNLOADING ─► VERIFYING ─► INSTALLING ─► READY ─► COMPLETED
//! (gateway itself)        (HTTP)      (SHA-256)   (standby         (ack)
//!                                                  partition,
//!                                                  boot switch)
//!
//! start_vehicle_ota   DOWNLOADING ─► VERIFYING ─► INSTALLING ──────────► COMPLETED
//! (whole vehicle)         (HTTP)    (parse+CRC32   (extract zones,
//!                                    +VIN check)    UDS block transfer
//!                                                   per ZGW, in order)
//! ```
//!
//! Any failure is a single transition to ERROR with a final progress report;
//! the partial download stays on disk for post-mortem.

pub mod download;
pub mod orchestrator;
pub mod partition;

pub use orchestrator::OtaOrchestrator;
pub use partition::{
    BootStatus, PartitionId, PartitionManager, PartitionMetadata, PartitionState,
};
