// layerline-core/src/domain/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::job::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Running,
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Running => "Running",
            AuditStatus::Success => "Success",
            AuditStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(AuditStatus::Running),
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(DomainError::Configuration(format!(
                "unknown audit status '{}'",
                other
            ))),
        }
    }
}

/// One stage attempt. Opened as `Running`, closed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub job_name: String,
    pub stage: Layer,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub row_count: u64,
    pub reject_count: u64,
    pub status: AuditStatus,
    pub message: Option<String>,
}

impl AuditRecord {
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Final figures written when a stage attempt ends.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditClosure {
    pub end_time: DateTime<Utc>,
    pub status: AuditStatus,
    pub row_count: u64,
    pub reject_count: u64,
    pub message: Option<String>,
}

/// Last successful load time for a (job, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub job_name: String,
    pub stage: Layer,
    pub last_load_time: DateTime<Utc>,
}
