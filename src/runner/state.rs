use serde::{Deserialize, Serialize};

use crate::parser::types::{Step, Trigger};

/// Logs expire a week after creation
pub const LOG_TTL_SECS: i64 = 3600 * 24 * 7;

/// Outcome of a single executed step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pass,
    Fail,
}

/// Lifecycle of a run log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    #[default]
    Running,
    Pass,
    Fail,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Running => "RUNNING",
            LogStatus::Pass => "PASS",
            LogStatus::Fail => "FAIL",
        }
    }
}

/// The record of one test run.
///
/// Created as `RUNNING` before the run starts, completed by the runner with
/// the executed steps, the duration and the terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Log {
    pub id: String,

    #[serde(default)]
    pub test_id: String,

    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub status: LogStatus,

    /// Seconds since epoch
    #[serde(default)]
    pub created_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Seconds since epoch
    #[serde(default)]
    pub started_at: i64,

    /// Milliseconds
    #[serde(default)]
    pub duration: u64,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Reason of the failing step, or why the run could not start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Log {
    pub fn create(test_id: &str, trigger: Trigger) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            test_id: test_id.to_string(),
            trigger,
            status: LogStatus::Running,
            created_at: now,
            expires_at: Some(now + LOG_TTL_SECS),
            started_at: 0,
            duration: 0,
            steps: Vec::new(),
            message: None,
        }
    }

    /// FAIL when nothing ran or any step failed
    pub fn derive_status(&self) -> LogStatus {
        if self.steps.is_empty()
            || self
                .steps
                .iter()
                .any(|s| s.status == Some(StepStatus::Fail))
        {
            LogStatus::Fail
        } else {
            LogStatus::Pass
        }
    }

    pub fn passed(&self) -> bool {
        self.status == LogStatus::Pass
    }

    pub fn failed_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.status == Some(StepStatus::Fail))
    }
}
