// layerline-core/src/ports/catalog.rs

use crate::domain::audit::{AuditClosure, AuditRecord, Watermark};
use crate::domain::job::{JobDefinition, Layer, TableRef};
use crate::domain::mapping::MappingSet;
use crate::error::EtlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Control tables: job definitions, column mappings, audit records, load
/// watermarks and the declared text lengths of materialized tables.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Creates the control tables when missing.
    async fn initialize(&self) -> Result<(), EtlError>;

    /// Stores a job and its mappings, replacing any previous definition.
    async fn save_job(&self, job: &JobDefinition, mappings: &MappingSet) -> Result<(), EtlError>;

    async fn job_names(&self) -> Result<Vec<String>, EtlError>;

    async fn job(&self, name: &str) -> Result<Option<JobDefinition>, EtlError>;

    async fn mappings(&self, job_name: &str) -> Result<MappingSet, EtlError>;

    /// Appends a `Running` record and returns its id.
    async fn open_audit(
        &self,
        job_name: &str,
        stage: Layer,
        start_time: DateTime<Utc>,
    ) -> Result<i64, EtlError>;

    /// Closes a record exactly once.
    async fn close_audit(&self, id: i64, closure: &AuditClosure) -> Result<AuditRecord, EtlError>;

    /// Most recent first.
    async fn audit_history(&self, job_name: &str, limit: usize)
    -> Result<Vec<AuditRecord>, EtlError>;

    async fn watermark(&self, job_name: &str, stage: Layer)
    -> Result<Option<DateTime<Utc>>, EtlError>;

    /// Moves the watermark to `at` unless it is already later.
    async fn advance_watermark(
        &self,
        job_name: &str,
        stage: Layer,
        at: DateTime<Utc>,
    ) -> Result<(), EtlError>;

    async fn watermarks(&self, job_name: &str) -> Result<Vec<Watermark>, EtlError>;

    /// Widest length each text column of `table` has been declared with.
    async fn column_lengths(&self, table: &TableRef) -> Result<HashMap<String, u32>, EtlError>;

    /// Replaces the recorded lengths of `table`.
    async fn record_column_lengths(
        &self,
        table: &TableRef,
        lengths: &[(String, u32)],
    ) -> Result<(), EtlError>;
}
