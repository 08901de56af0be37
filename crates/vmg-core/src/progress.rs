//! OTA lifecycle state and progress reporting
//!
//! Progress flows as a stream of typed events from the orchestrator into a
//! [`ProgressSink`]; the daemon's sink serializes the snapshot to JSON and
//! publishes it on `oem/<vin>/ota/progress`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// OTA update lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaState {
    Idle,
    Downloading,
    Verifying,
    Installing,
    /// Installed and switched; waiting for the caller to acknowledge
    Ready,
    Error,
    Completed,
}

impl OtaState {
    /// Numeric code used in the backend progress JSON
    pub fn code(&self) -> u8 {
        match self {
            OtaState::Idle => 0,
            OtaState::Downloading => 1,
            OtaState::Verifying => 2,
            OtaState::Installing => 3,
            OtaState::Ready => 4,
            OtaState::Error => 5,
            OtaState::Completed => 6,
        }
    }

    /// An OTA transaction is in progress unless idle, completed or failed.
    pub fn in_progress(&self) -> bool {
        !matches!(self, OtaState::Idle | OtaState::Completed | OtaState::Error)
    }
}

/// Typed progress event emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StateChange { state: OtaState, step: String },
    Bytes { downloaded: u64, total: u64 },
    Completed,
    Failed { kind: &'static str, message: String },
}

/// Serializable progress snapshot published to the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub state: u8,
    pub percentage: u8,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressReport {
    /// Fold one progress event into the snapshot.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StateChange { state, step } => {
                self.state = state.code();
                self.current_step = step.clone();
            }
            ProgressEvent::Bytes { downloaded, total } => {
                self.downloaded_bytes = *downloaded;
                self.total_bytes = *total;
                self.percentage = if *total > 0 {
                    (*downloaded * 100 / *total) as u8
                } else {
                    100
                };
            }
            ProgressEvent::Completed => {
                self.state = OtaState::Completed.code();
                self.percentage = 100;
            }
            ProgressEvent::Failed { kind, message } => {
                self.state = OtaState::Error.code();
                self.error = Some((*kind).to_string());
                self.current_step = message.clone();
            }
        }
    }
}

/// Consumer of progress reports
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, report: &ProgressReport);
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn publish(&self, _report: &ProgressReport) {}
}

/// Sink that buffers reports in memory, for tests
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<ProgressReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<ProgressReport> {
        self.reports.lock().await.clone()
    }

    pub async fn last(&self) -> Option<ProgressReport> {
        self.reports.lock().await.last().cloned()
    }
}

#[async_trait]
impl ProgressSink for MemorySink {
    async fn publish(&self, report: &ProgressReport) {
        self.reports.lock().await.push(report.clone());
    }
}

/// Package metadata announced by the backend with a `start_ota` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaPackageInfo {
    pub campaign_id: String,
    pub package_url: String,
    pub package_size: u64,
    /// Encoded `0xAABBCCDD` = vAA.BB.CC.DD
    pub firmware_version: u32,
    /// Expected SHA-256 of the package file, 64 hex characters
    pub sha256_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_partition: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_matches_lifecycle() {
        assert!(!OtaState::Idle.in_progress());
        assert!(!OtaState::Completed.in_progress());
        assert!(!OtaState::Error.in_progress());
        assert!(OtaState::Downloading.in_progress());
        assert!(OtaState::Verifying.in_progress());
        assert!(OtaState::Installing.in_progress());
        assert!(OtaState::Ready.in_progress());
    }

    #[test]
    fn report_serializes_error_only_when_set() {
        let mut report = ProgressReport {
            state: OtaState::Downloading.code(),
            percentage: 40,
            downloaded_bytes: 4096,
            total_bytes: 10240,
            current_step: "Downloading OTA package".into(),
            error: None,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["percentage"], 40);

        report.error = Some("integrity".into());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "integrity");
    }

    #[test]
    fn events_fold_into_the_snapshot() {
        let mut report = ProgressReport::default();

        report.apply(&ProgressEvent::StateChange {
            state: OtaState::Downloading,
            step: "Downloading OTA package".into(),
        });
        assert_eq!(report.state, 1);

        report.apply(&ProgressEvent::Bytes {
            downloaded: 512,
            total: 2048,
        });
        assert_eq!(report.percentage, 25);

        report.apply(&ProgressEvent::Failed {
            kind: "integrity",
            message: "CRC mismatch".into(),
        });
        assert_eq!(report.state, OtaState::Error.code());
        assert_eq!(report.error.as_deref(), Some("integrity"));
        assert_eq!(report.current_step, "CRC mismatch");
        // Progress made so far stays visible in the final report
        assert_eq!(report.percentage, 25);
    }

    #[tokio::test]
    async fn memory_sink_buffers_in_order() {
        let sink = MemorySink::new();
        for pct in [0u8, 5, 10] {
            sink.publish(&ProgressReport {
                percentage: pct,
                ..Default::default()
            })
            .await;
        }
        let seen: Vec<u8> = sink.reports().await.iter().map(|r| r.percentage).collect();
        assert_eq!(seen, vec![0, 5, 10]);
    }
}
