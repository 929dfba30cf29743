// layerline-core/src/domain/job.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::DomainError;

/// The three data-quality layers. Also the name of the stage that fills each
/// layer (Source→Raw is the "Raw" stage, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    Raw,
    Curated,
    Processed,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Raw, Layer::Curated, Layer::Processed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Raw => "Raw",
            Layer::Curated => "Curated",
            Layer::Processed => "Processed",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Layer::Raw),
            "curated" => Ok(Layer::Curated),
            "processed" => Ok(Layer::Processed),
            other => Err(DomainError::Configuration(format!(
                "unknown stage '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    #[default]
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScdType {
    #[default]
    None,
    #[serde(alias = "1", alias = "scd1")]
    Type1,
    #[serde(alias = "2", alias = "scd2")]
    Type2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileFormat::Csv => &["csv"],
            FileFormat::Json => &["json", "jsonl", "ndjson"],
        }
    }
}

impl LoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Full => "full",
            LoadType::Incremental => "incremental",
        }
    }
}

impl FromStr for LoadType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LoadType::Full),
            "incremental" => Ok(LoadType::Incremental),
            other => Err(DomainError::Configuration(format!(
                "load type must be 'full' or 'incremental', got '{}'",
                other
            ))),
        }
    }
}

impl ScdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScdType::None => "none",
            ScdType::Type1 => "type1",
            ScdType::Type2 => "type2",
        }
    }
}

impl FromStr for ScdType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(ScdType::None),
            "type1" | "1" | "scd1" => Ok(ScdType::Type1),
            "type2" | "2" | "scd2" => Ok(ScdType::Type2),
            other => Err(DomainError::Configuration(format!(
                "unknown SCD type '{}'",
                other
            ))),
        }
    }
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
        }
    }
}

impl FromStr for FileFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "json" => Ok(FileFormat::Json),
            other => Err(DomainError::Configuration(format!(
                "unsupported file format '{}'",
                other
            ))),
        }
    }
}

/// Where a job's rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    /// A file, or a directory of files, in the given format.
    File { format: FileFormat, location: String },
    /// A relational table already in the store.
    Table {
        schema: String,
        table: String,
        /// Column compared against the watermark on incremental loads.
        #[serde(default)]
        change_column: Option<String>,
    },
}

impl SourceSpec {
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::File { location, .. } => location.clone(),
            SourceSpec::Table { schema, table, .. } => format!("{}.{}", schema, table),
        }
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parses `schema.table`; a bare name lands in `default_schema`.
    pub fn parse(reference: &str, default_schema: &str) -> Self {
        match reference.split_once('.') {
            Some((schema, table)) => Self::new(schema.trim(), table.trim()),
            None => Self::new(default_schema, reference.trim()),
        }
    }

    /// Quoted form for SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema names of the two intermediate layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSchemas {
    pub raw: String,
    pub curated: String,
}

impl Default for LayerSchemas {
    fn default() -> Self {
        Self {
            raw: "raw".to_string(),
            curated: "curated".to_string(),
        }
    }
}

/// A declarative job: one source flowing through Raw and Curated into one
/// Processed table.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub name: String,
    pub source: SourceSpec,
    pub target_schema: String,
    pub target_table: String,
    pub load_type: LoadType,
    pub scd_type: ScdType,
    /// Reject ratio above which a stage fails. `None` never escalates.
    pub reject_threshold: Option<f64>,
}

impl JobDefinition {
    pub fn table_for(&self, layer: Layer, schemas: &LayerSchemas) -> TableRef {
        match layer {
            Layer::Raw => TableRef::new(&schemas.raw, &self.target_table),
            Layer::Curated => TableRef::new(&schemas.curated, &self.target_table),
            Layer::Processed => TableRef::new(&self.target_schema, &self.target_table),
        }
    }
}
