// layerline-core/src/ports/source.rs

use crate::domain::job::FileFormat;
use crate::domain::value::Record;
use crate::error::EtlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A source file and the date it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub marker: DateTime<Utc>,
}

/// Turns a job's source location into rows of text values. The core never
/// parses files itself.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Files at `location` matching `format`, oldest marker first.
    async fn discover(&self, location: &str, format: FileFormat)
    -> Result<Vec<SourceFile>, EtlError>;

    /// Every row of one file, field name -> raw text, in file order.
    async fn read(&self, file: &SourceFile, format: FileFormat) -> Result<Vec<Record>, EtlError>;
}
