// layerline-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    // --- DOMAIN (configuration, schema conflicts, state machine) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE (store, IO, parsing) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl EtlError {
    /// Configuration and schema problems are fatal for the job and are not
    /// worth retrying until the job files change.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EtlError::Domain(DomainError::Configuration(_))
                | EtlError::Domain(DomainError::SchemaConflict { .. })
                | EtlError::Domain(DomainError::UnknownJob(_))
        )
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<duckdb::Error> for EtlError {
    fn from(err: duckdb::Error) -> Self {
        EtlError::Infrastructure(InfrastructureError::from(err))
    }
}
