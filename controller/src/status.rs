//! Per-cycle status reporting
//!
//! Every cycle produces one structured log event. When a status file is
//! configured the same record is written there as JSON, replacing the file
//! atomically so readers never see a partial write.

use crate::controller::ObservatoryState;
use crate::safety::SafetyReadings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// What one evaluation cycle saw and decided
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub state: ObservatoryState,
    pub pending_count: u32,
    #[serde(flatten)]
    pub readings: SafetyReadings,
}

/// Sink for [`CycleReport`]s
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    path: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log the report and, if configured, write the status file.
    ///
    /// A failed file write is logged; it never fails the cycle.
    pub async fn report(&self, report: &CycleReport) {
        let r = &report.readings;
        tracing::info!(
            state = %report.state,
            pending_count = report.pending_count,
            raining = r.raining,
            daytime = r.daytime,
            cloudy = r.cloudy,
            bad_weather = r.bad_weather,
            aurora_exceeded = r.aurora_exceeded,
            smoke_heavy = r.smoke_heavy,
            "Cycle complete"
        );

        if let Some(path) = &self.path {
            if let Err(e) = write_status(path, report).await {
                tracing::warn!("Failed to write status file {}: {}", path.display(), e);
            }
        }
    }
}

/// Write to a hidden sibling, then rename over the target
async fn write_status(path: &Path, report: &CycleReport) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "status file has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> CycleReport {
        CycleReport {
            timestamp: Utc.with_ymd_and_hms(2024, 11, 2, 23, 15, 0).unwrap(),
            state: ObservatoryState::ClosePending,
            pending_count: 3,
            readings: SafetyReadings {
                cloudy: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_report_json_is_flat() {
        let value = serde_json::to_value(report()).unwrap();
        assert_eq!(value["state"], "close_pending");
        assert_eq!(value["pending_count"], 3);
        assert_eq!(value["cloudy"], true);
        assert_eq!(value["raining"], false);
        assert_eq!(value["timestamp"], "2024-11-02T23:15:00Z");
    }

    #[tokio::test]
    async fn test_status_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "stale").unwrap();

        let reporter = StatusReporter::new(Some(path.clone()));
        reporter.report(&report()).await;

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["state"], "close_pending");
        // Only the status file remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_status_file_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = StatusReporter::new(Some(dir.path().join("missing/status.json")));
        reporter.report(&report()).await;
        assert!(!dir.path().join("missing").exists());
    }
}
