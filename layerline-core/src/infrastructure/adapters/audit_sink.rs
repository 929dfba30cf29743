// layerline-core/src/infrastructure/adapters/audit_sink.rs

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::domain::audit::{AuditRecord, AuditStatus};
use crate::domain::job::Layer;
use crate::ports::audit_sink::AuditSink;

/// Severity attached to a failed stage when forwarded to monitoring.
pub fn failure_severity(stage: Layer) -> &'static str {
    match stage {
        Layer::Raw => "ERROR",
        Layer::Curated => "CRITICAL",
        Layer::Processed => "SERVER",
    }
}

/// Emits closed records as structured `tracing` events.
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn publish(&self, record: &AuditRecord) -> Result<(), String> {
        let message = record.message.as_deref().unwrap_or("");
        match record.status {
            AuditStatus::Failed => error!(
                target: "layerline::audit",
                job = %record.job_name,
                stage = %record.stage,
                rows = record.row_count,
                rejects = record.reject_count,
                severity = failure_severity(record.stage),
                "{}",
                message
            ),
            _ => info!(
                target: "layerline::audit",
                job = %record.job_name,
                stage = %record.stage,
                rows = record.row_count,
                rejects = record.reject_count,
                "{}",
                message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

#[derive(Serialize)]
struct AuditEvent<'a> {
    level: &'static str,
    severity: Option<&'static str>,
    tags: [&'a str; 3],
    #[serde(flatten)]
    record: &'a AuditRecord,
}

/// Appends one JSON object per closed record to a file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for JsonlSink {
    async fn publish(&self, record: &AuditRecord) -> Result<(), String> {
        let failed = record.status == AuditStatus::Failed;
        let event = AuditEvent {
            level: if failed { "ERROR" } else { "INFO" },
            severity: failed.then(|| failure_severity(record.stage)),
            tags: [record.stage.as_str(), "etl", record.status.as_str()],
            record,
        };
        let mut line = serde_json::to_string(&event).map_err(|e| e.to_string())?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| format!("{}: {}", self.path.display(), e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        file.flush().await.map_err(|e| e.to_string())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

pub struct NoopSink;

#[async_trait]
impl AuditSink for NoopSink {
    async fn publish(&self, _record: &AuditRecord) -> Result<(), String> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(status: AuditStatus) -> AuditRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        AuditRecord {
            id: 1,
            job_name: "JOB_EMP".into(),
            stage: Layer::Curated,
            start_time: start,
            end_time: Some(start),
            row_count: 3,
            reject_count: 1,
            status,
            message: Some("3 rows accepted".into()),
        }
    }

    #[tokio::test]
    async fn test_jsonl_appends_one_line_per_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs").join("audit.jsonl");
        let sink = JsonlSink::new(&path);

        sink.publish(&record(AuditStatus::Success)).await.unwrap();
        sink.publish(&record(AuditStatus::Failed)).await.unwrap();

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "INFO");
        assert!(lines[0]["severity"].is_null());
        assert_eq!(lines[1]["level"], "ERROR");
        assert_eq!(lines[1]["severity"], "CRITICAL");
        assert_eq!(lines[1]["tags"][2], "Failed");
        assert_eq!(lines[1]["job_name"], "JOB_EMP");
        Ok(())
    }

    #[tokio::test]
    async fn test_jsonl_reports_unwritable_path() {
        let dir = tempdir().unwrap();
        // A directory where the file should be.
        let sink = JsonlSink::new(dir.path());
        assert!(sink.publish(&record(AuditStatus::Success)).await.is_err());
    }
}
