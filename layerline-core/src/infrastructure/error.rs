// layerline-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DatabaseError {
    #[error("DuckDB Engine Error: {0}")]
    #[diagnostic(
        code(layerline::infra::database::duckdb),
        help("An error occurred inside the SQL engine.")
    )]
    DuckDB(#[from] duckdb::Error),

    #[error("Store connection lock poisoned")]
    #[diagnostic(code(layerline::infra::database::poisoned))]
    Poisoned,

    #[error("Unsupported column type '{0}' in result set")]
    #[diagnostic(
        code(layerline::infra::database::unsupported_type),
        help("Cast the column to VARCHAR in the query.")
    )]
    UnsupportedType(String),
}

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- DATABASE ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    // --- FILESYSTEM ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(layerline::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- CONFIG / YAML ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(
        code(layerline::infra::yaml),
        help("Check your YAML syntax (indentation, types).")
    )]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON Error: {0}")]
    #[diagnostic(code(layerline::infra::json))]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Project configuration not found at '{0}'")]
    #[diagnostic(code(layerline::infra::config_missing))]
    ConfigNotFound(String),

    #[error("Source Error: {0}")]
    #[diagnostic(
        code(layerline::infra::source),
        help("Check the job's source location and format.")
    )]
    SourceError(String),
}

impl From<duckdb::Error> for InfrastructureError {
    fn from(err: duckdb::Error) -> Self {
        InfrastructureError::Database(DatabaseError::DuckDB(err))
    }
}
