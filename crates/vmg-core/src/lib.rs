//! vmg-core - Shared types for the VMG OTA gateway
//!
//! This crate holds the vocabulary the other VMG crates speak:
//! error kinds, the OTA lifecycle state machine and its progress events,
//! the cooperative cancellation token, the zone-to-ZGW routing table, and
//! the daemon configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       vmgd (daemon)                      │
//! │   MQTT command loop · VCI collector · readiness manager  │
//! └───────┬──────────────────────┬───────────────────────────┘
//!         │                      │
//!   ┌─────┴──────┐        ┌──────┴──────┐
//!   │  vmg-ota   │───────►│ vmg-package │
//!   │ orchestr.  │        │  parsers    │
//!   │ partitions │        └─────────────┘
//!   └─────┬──────┘
//!         │
//!   ┌─────┴──────┐
//!   │  vmg-doip  │──────► ZGW (DoIP/UDS, TCP 13400)
//!   └────────────┘
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod progress;
pub mod routing;

pub use cancel::CancelToken;
pub use config::VmgConfig;
pub use error::{VmgError, VmgResult};
pub use progress::{
    MemorySink, NullSink, OtaPackageInfo, OtaState, ProgressEvent, ProgressReport, ProgressSink,
};
pub use routing::{ZgwEndpoint, ZoneRoutingTable};
