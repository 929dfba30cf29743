// layerline-core/src/domain/mapping.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::job::{JobDefinition, ScdType, TableRef};
use crate::domain::reject::RejectReason;
use crate::domain::value::{Record, Value};

const DEFAULT_PRECISION: u8 = 18;
const NULL_TOKENS: [&str; 4] = ["", "nan", "none", "null"];

/// Logical target types a mapping may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int,
    BigInt,
    Decimal,
    Numeric,
    Float,
    Bit,
    Date,
    DateTime,
    Varchar,
    NVarchar,
}

impl DataType {
    pub fn is_varlen(&self) -> bool {
        matches!(self, DataType::Varchar | DataType::NVarchar)
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, DataType::Decimal | DataType::Numeric)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Decimal => "DECIMAL",
            DataType::Numeric => "NUMERIC",
            DataType::Float => "FLOAT",
            DataType::Bit => "BIT",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
            DataType::Varchar => "VARCHAR",
            DataType::NVarchar => "NVARCHAR",
        };
        f.write_str(name)
    }
}

impl FromStr for DataType {
    type Err = DomainError;

    /// Accepts the base name; a trailing `(..)` is ignored, length and
    /// precision are separate mapping attributes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = s.split('(').next().unwrap_or_default().trim();
        match base.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(DataType::Int),
            "BIGINT" => Ok(DataType::BigInt),
            "DECIMAL" => Ok(DataType::Decimal),
            "NUMERIC" => Ok(DataType::Numeric),
            "FLOAT" | "REAL" | "DOUBLE" => Ok(DataType::Float),
            "BIT" | "BOOLEAN" | "BOOL" => Ok(DataType::Bit),
            "DATE" => Ok(DataType::Date),
            "DATETIME" | "TIMESTAMP" => Ok(DataType::DateTime),
            "VARCHAR" => Ok(DataType::Varchar),
            "NVARCHAR" => Ok(DataType::NVarchar),
            _ => Err(DomainError::Configuration(format!(
                "unsupported data type '{}'",
                s
            ))),
        }
    }
}

/// One row of column metadata: how a source field lands in the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub job_name: String,
    pub source_column: String,
    pub target_column: String,
    pub data_type: DataType,
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub reference_table: Option<String>,
}

/// What the schema materializer needs to know about a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Capabilities the engines use instead of reflecting on row types.
pub trait ColumnContract {
    fn describe(&self) -> ColumnDescriptor;
    fn cast(&self, raw: &Value) -> Result<Value, RejectReason>;
    fn validate(&self, value: &Value) -> Result<(), RejectReason>;
}

impl ColumnMapping {
    /// Physical DuckDB type.
    pub fn sql_type(&self) -> String {
        match self.data_type {
            DataType::Int => "INTEGER".to_string(),
            DataType::BigInt => "BIGINT".to_string(),
            DataType::Decimal | DataType::Numeric => {
                let (p, s) = self.precision_scale();
                format!("DECIMAL({},{})", p, s)
            }
            DataType::Float => "DOUBLE".to_string(),
            DataType::Bit => "BOOLEAN".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::DateTime => "TIMESTAMP".to_string(),
            DataType::Varchar | DataType::NVarchar => match self.length {
                Some(n) => format!("VARCHAR({})", n),
                None => "VARCHAR".to_string(),
            },
        }
    }

    pub fn precision_scale(&self) -> (u8, u8) {
        (
            self.precision.unwrap_or(DEFAULT_PRECISION),
            self.scale.unwrap_or(0),
        )
    }

    /// Primary-key columns are never nullable, whatever the flag says.
    pub fn effective_nullable(&self) -> bool {
        self.nullable && !self.primary_key
    }

    /// Whether a column the store reports as `physical` can hold this
    /// mapping's values without retyping.
    pub fn is_compatible_with(&self, physical: &str) -> bool {
        let physical = physical.trim().to_ascii_uppercase();
        match self.data_type {
            DataType::Int => matches!(physical.as_str(), "INTEGER" | "INT" | "BIGINT"),
            DataType::BigInt => physical == "BIGINT",
            DataType::Decimal | DataType::Numeric => {
                let (p, s) = self.precision_scale();
                parse_decimal_type(&physical).is_some_and(|(pp, ps)| ps == s && pp >= p)
            }
            DataType::Float => matches!(physical.as_str(), "DOUBLE" | "FLOAT" | "REAL"),
            DataType::Bit => physical == "BOOLEAN",
            DataType::Date => physical == "DATE",
            DataType::DateTime => matches!(physical.as_str(), "TIMESTAMP" | "DATETIME"),
            DataType::Varchar | DataType::NVarchar => {
                physical == "VARCHAR" || physical.starts_with("VARCHAR(")
            }
        }
    }

    fn cast_failure(&self, raw: &str) -> RejectReason {
        RejectReason::CastFailure {
            column: self.target_column.clone(),
            value: raw.to_string(),
            target: self.data_type.to_string(),
        }
    }
}

impl ColumnContract for ColumnMapping {
    fn describe(&self) -> ColumnDescriptor {
        ColumnDescriptor {
            name: self.target_column.clone(),
            sql_type: self.sql_type(),
            nullable: self.effective_nullable(),
            primary_key: self.primary_key,
        }
    }

    fn cast(&self, raw: &Value) -> Result<Value, RejectReason> {
        let text = match raw {
            Value::Null => return Ok(Value::Null),
            Value::Text(s) => clean_text(s),
            // Already typed (read back from a typed layer): normalise via text.
            other => other.render(),
        };
        let Some(text) = text else {
            return Ok(Value::Null);
        };

        let value = match self.data_type {
            DataType::Int => parse_integer(&text)
                .filter(|i| i32::try_from(*i).is_ok())
                .map(Value::Int)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::BigInt => parse_integer(&text)
                .map(Value::Int)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::Float => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::Decimal | DataType::Numeric => {
                let (p, s) = self.precision_scale();
                normalize_decimal(&text, p, s)
                    .map(Value::Decimal)
                    .ok_or_else(|| self.cast_failure(&text))?
            }
            DataType::Bit => parse_bool(&text)
                .map(Value::Bool)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::Date => parse_date(&text)
                .map(Value::Date)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::DateTime => parse_datetime(&text)
                .map(Value::Timestamp)
                .ok_or_else(|| self.cast_failure(&text))?,
            DataType::Varchar | DataType::NVarchar => {
                if let Some(max) = self.length {
                    let len = text.chars().count();
                    if len > max as usize {
                        return Err(RejectReason::LengthExceeded {
                            column: self.target_column.clone(),
                            length: len,
                            max,
                        });
                    }
                }
                Value::Text(text)
            }
        };
        Ok(value)
    }

    fn validate(&self, value: &Value) -> Result<(), RejectReason> {
        if value.is_null() && !self.effective_nullable() {
            return Err(RejectReason::NullViolation {
                column: self.target_column.clone(),
            });
        }
        Ok(())
    }
}

/// The full descriptor list of one job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingSet {
    columns: Vec<ColumnMapping>,
}

impl MappingSet {
    pub fn new(columns: Vec<ColumnMapping>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.target_column.clone()).collect()
    }

    pub fn key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.target_column.clone())
            .collect()
    }

    /// Non-key columns: the attributes SCD merges compare and overwrite.
    pub fn tracked_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| c.target_column.clone())
            .collect()
    }

    pub fn get(&self, target_column: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.target_column == target_column)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns
            .iter()
            .filter(|c| c.foreign_key && c.reference_table.as_deref().is_some_and(|r| !r.is_empty()))
    }

    pub fn describe_columns(&self) -> Vec<ColumnDescriptor> {
        self.columns.iter().map(ColumnContract::describe).collect()
    }

    /// Casts and validates every mapped column of an already renamed row.
    /// Stops at the first problem: a row is rejected once.
    pub fn cast_record(&self, row: &Record) -> Result<Record, RejectReason> {
        let mut out = Record::new();
        for column in &self.columns {
            let raw = row.get(&column.target_column).unwrap_or(&Value::Null);
            let value = column.cast(raw)?;
            column.validate(&value)?;
            out.insert(column.target_column.clone(), value);
        }
        Ok(out)
    }

    /// Referenced table of an FK column; bare names resolve in `default_schema`.
    pub fn reference_of(&self, column: &ColumnMapping, default_schema: &str) -> Option<TableRef> {
        column
            .reference_table
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| TableRef::parse(r, default_schema))
    }

    /// Cross-field rules a single column cannot check on its own.
    pub fn validate_for(&self, job: &JobDefinition) -> Result<(), DomainError> {
        let mut problems = Vec::new();

        if self.columns.is_empty() {
            problems.push(format!("job '{}' has no column mappings", job.name));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.target_column.to_ascii_lowercase()) {
                problems.push(format!("duplicate target column '{}'", column.target_column));
            }
            if column.data_type.is_varlen() && column.length.unwrap_or(0) == 0 {
                problems.push(format!(
                    "{} column '{}' requires a positive length",
                    column.data_type, column.target_column
                ));
            }
            if column.data_type.is_decimal() {
                let (p, s) = column.precision_scale();
                if p == 0 || p > 38 || s > p {
                    problems.push(format!(
                        "column '{}' has invalid precision/scale ({},{})",
                        column.target_column, p, s
                    ));
                }
            }
            if column.foreign_key && column.reference_table.as_deref().unwrap_or("").trim().is_empty()
            {
                problems.push(format!(
                    "foreign key column '{}' names no reference table",
                    column.target_column
                ));
            }
            if column.target_column.starts_with('_') {
                problems.push(format!(
                    "target column '{}' uses the reserved '_' prefix",
                    column.target_column
                ));
            }
        }

        if job.scd_type == ScdType::Type2 && self.key_columns().is_empty() {
            problems.push(format!(
                "job '{}' uses SCD type 2 but no column is flagged as primary key",
                job.name
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Configuration(problems.join("; ")))
        }
    }
}

/// Generic cleaning: trim, and map the usual null spellings to null.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(i);
    }
    // "101.0" from spreadsheets: accept only when integral.
    let f = text.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d);
        }
    }
    parse_datetime(text).map(|ts| ts.date())
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Normalises a decimal literal to exactly `scale` fraction digits.
/// Returns `None` when it is not a number or does not fit `precision`.
fn normalize_decimal(text: &str, precision: u8, scale: u8) -> Option<String> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let scale = scale as usize;
    if frac_part.len() > scale && frac_part[scale..].chars().any(|c| c != '0') {
        return None;
    }
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let int_digits = if int_part == "0" { 0 } else { int_part.len() };
    if int_digits > (precision as usize).saturating_sub(scale) {
        return None;
    }
    let mut frac: String = frac_part.chars().take(scale).collect();
    while frac.len() < scale {
        frac.push('0');
    }
    let is_zero = int_part == "0" && frac.chars().all(|c| c == '0');
    let sign = if negative && !is_zero { "-" } else { "" };
    if scale == 0 {
        Some(format!("{}{}", sign, int_part))
    } else {
        Some(format!("{}{}.{}", sign, int_part, frac))
    }
}

fn parse_decimal_type(physical: &str) -> Option<(u8, u8)> {
    let inner = physical
        .strip_prefix("DECIMAL(")
        .or_else(|| physical.strip_prefix("NUMERIC("))?
        .strip_suffix(')')?;
    let (p, s) = inner.split_once(',')?;
    Some((p.trim().parse().ok()?, s.trim().parse().ok()?))
}
