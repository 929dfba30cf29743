// layerline-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(layerline::domain::configuration),
        help("Check the job definition and its column mappings.")
    )]
    Configuration(String),

    #[error("Job '{0}' is not registered in the catalog")]
    #[diagnostic(
        code(layerline::domain::unknown_job),
        help("Run `layerline sync` or check the job name.")
    )]
    UnknownJob(String),

    #[error("Schema conflict on {table}: {}", .conflicts.join("; "))]
    #[diagnostic(
        code(layerline::domain::schema_conflict),
        help("Existing columns are never retyped. Migrate the table or fix the mapping.")
    )]
    SchemaConflict {
        table: String,
        conflicts: Vec<String>,
    },

    #[error(
        "Reject threshold exceeded in {stage}: {rejected} of {total} rows rejected (limit {threshold:.2})"
    )]
    #[diagnostic(code(layerline::domain::reject_threshold))]
    RejectThresholdExceeded {
        stage: String,
        rejected: u64,
        total: u64,
        threshold: f64,
    },

    #[error("Invalid run transition: {from} -> {to}")]
    #[diagnostic(code(layerline::domain::transition))]
    InvalidTransition { from: String, to: String },

    #[error("Audit record {0} is already closed")]
    #[diagnostic(
        code(layerline::domain::audit_closed),
        help("Closed audit records are immutable. Append a new record instead.")
    )]
    AuditAlreadyClosed(i64),

    #[error("Run cancelled before stage {0}")]
    #[diagnostic(code(layerline::domain::cancelled))]
    Cancelled(String),
}
