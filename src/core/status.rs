//! Process status - The persisted liveness state of one tracked process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of a tracked process for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Observed alive in the most recent cycle
    Running,
    /// Not observed, and either never seen or seen within the dormant timeout
    NotRunning,
    /// Not observed for longer than the dormant timeout
    Dormant,
}

impl ProcessStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::NotRunning => "Not running",
            Self::Dormant => "Dormant",
        }
    }

    /// Value stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::NotRunning => "not running",
            Self::Dormant => "dormant",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "not running" => Some(Self::NotRunning),
            "dormant" => Some(Self::Dormant),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of one (user, process) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub username: String,
    pub process_name: String,
    pub status: ProcessStatus,
    /// Most recent reconciliation of this pair
    pub last_checked: DateTime<Utc>,
    /// Most recent cycle that observed the process running
    pub last_active: Option<DateTime<Utc>>,
}
