//! The record of one complete run, as written by `run --json`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mountlink_core::{ModuleResult, ModuleStatus};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When the run started, RFC 3339 in UTC.
    pub test_timestamp: DateTime<Utc>,
    /// Wall-clock time for the whole run, modules included.
    pub test_duration_ms: u64,
    pub modules: Vec<ModuleResult>,
}

impl RunReport {
    pub fn new(started: DateTime<Utc>, duration: Duration, modules: Vec<ModuleResult>) -> Self {
        RunReport {
            test_timestamp: started,
            test_duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            modules,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.test_duration_ms)
    }

    /// Whether any module failed outright or could not run.
    pub fn failed(&self) -> bool {
        self.modules
            .iter()
            .any(|m| matches!(m.overall_status(), ModuleStatus::Fail | ModuleStatus::Error))
    }
}
