// layerline-core/src/application/recorder.rs

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::audit::{AuditClosure, AuditRecord, AuditStatus};
use crate::domain::job::Layer;
use crate::error::EtlError;
use crate::ports::audit_sink::AuditSink;
use crate::ports::catalog::CatalogStore;

/// Persists stage outcomes and watermarks, and forwards closed records to
/// the external sink. Only the orchestrator writes through it.
#[derive(Clone)]
pub struct AuditRecorder {
    catalog: Arc<dyn CatalogStore>,
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(catalog: Arc<dyn CatalogStore>, sink: Arc<dyn AuditSink>) -> Self {
        Self { catalog, sink }
    }

    pub async fn open(
        &self,
        job_name: &str,
        stage: Layer,
        start_time: DateTime<Utc>,
    ) -> Result<i64, EtlError> {
        let id = self.catalog.open_audit(job_name, stage, start_time).await?;
        debug!(audit_id = id, "Opened audit for {}/{}", job_name, stage);
        Ok(id)
    }

    /// Closes the record, then hands a copy to the sink. Delivery problems
    /// are logged and dropped.
    pub async fn close(
        &self,
        id: i64,
        status: AuditStatus,
        row_count: u64,
        reject_count: u64,
        message: Option<String>,
    ) -> Result<AuditRecord, EtlError> {
        let closure = AuditClosure {
            end_time: Utc::now(),
            status,
            row_count,
            reject_count,
            message,
        };
        let record = self.catalog.close_audit(id, &closure).await?;
        if let Err(e) = self.sink.publish(&record).await {
            warn!(
                sink = self.sink.name(),
                audit_id = id,
                "Audit sink delivery failed: {}",
                e
            );
        }
        Ok(record)
    }

    pub async fn watermark(
        &self,
        job_name: &str,
        stage: Layer,
    ) -> Result<Option<DateTime<Utc>>, EtlError> {
        self.catalog.watermark(job_name, stage).await
    }

    /// Moves each listed stage's watermark. Stages not listed keep theirs.
    pub async fn advance(
        &self,
        job_name: &str,
        marks: &[(Layer, DateTime<Utc>)],
    ) -> Result<(), EtlError> {
        for (stage, at) in marks {
            self.catalog.advance_watermark(job_name, *stage, *at).await?;
            debug!("Watermark {}/{} -> {}", job_name, stage, at.to_rfc3339());
        }
        Ok(())
    }
}
