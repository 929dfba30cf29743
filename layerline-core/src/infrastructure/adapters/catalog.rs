// layerline-core/src/infrastructure/adapters/catalog.rs
//
// Control tables kept in the same DuckDB file as the data, in schema
// `layerline`. Uniqueness is enforced here rather than with key constraints
// so a definition can be replaced (delete + insert) in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::domain::audit::{AuditClosure, AuditRecord, AuditStatus, Watermark};
use crate::domain::error::DomainError;
use crate::domain::job::{
    FileFormat, JobDefinition, Layer, LoadType, ScdType, SourceSpec, TableRef,
};
use crate::domain::mapping::{ColumnMapping, DataType, MappingSet, parse_datetime};
use crate::domain::value::Value;
use crate::error::EtlError;
use crate::ports::catalog::CatalogStore;
use crate::ports::connector::{Connector, Statement};

const CATALOG_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS layerline;
CREATE SEQUENCE IF NOT EXISTS layerline.job_audit_id_seq START 1;
CREATE TABLE IF NOT EXISTS layerline.jobs (
    job_name VARCHAR NOT NULL,
    source_kind VARCHAR NOT NULL,
    source_format VARCHAR,
    source_location VARCHAR,
    source_schema VARCHAR,
    source_table VARCHAR,
    change_column VARCHAR,
    target_schema VARCHAR NOT NULL,
    target_table VARCHAR NOT NULL,
    load_type VARCHAR NOT NULL,
    scd_type VARCHAR NOT NULL,
    reject_threshold DOUBLE
);
CREATE TABLE IF NOT EXISTS layerline.column_mappings (
    job_name VARCHAR NOT NULL,
    ordinal INTEGER NOT NULL,
    source_column VARCHAR NOT NULL,
    target_column VARCHAR NOT NULL,
    data_type VARCHAR NOT NULL,
    length INTEGER,
    "precision" INTEGER,
    scale INTEGER,
    is_nullable BOOLEAN NOT NULL,
    is_primary_key BOOLEAN NOT NULL,
    is_foreign_key BOOLEAN NOT NULL,
    reference_table VARCHAR
);
CREATE TABLE IF NOT EXISTS layerline.job_audit (
    id BIGINT NOT NULL DEFAULT nextval('layerline.job_audit_id_seq'),
    job_name VARCHAR NOT NULL,
    stage VARCHAR NOT NULL,
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP,
    row_count BIGINT NOT NULL DEFAULT 0,
    reject_count BIGINT NOT NULL DEFAULT 0,
    status VARCHAR NOT NULL,
    message VARCHAR
);
CREATE TABLE IF NOT EXISTS layerline.load_watermark (
    job_name VARCHAR NOT NULL,
    stage VARCHAR NOT NULL,
    last_load_time TIMESTAMP NOT NULL
);
CREATE TABLE IF NOT EXISTS layerline.column_lengths (
    schema_name VARCHAR NOT NULL,
    table_name VARCHAR NOT NULL,
    column_name VARCHAR NOT NULL,
    max_length INTEGER NOT NULL
);
"#;

const AUDIT_COLUMNS: &str = "CAST(id AS VARCHAR), job_name, stage, \
     CAST(start_time AS VARCHAR), CAST(end_time AS VARCHAR), \
     CAST(row_count AS VARCHAR), CAST(reject_count AS VARCHAR), status, message";

pub struct DuckDBCatalog {
    connector: Arc<dyn Connector>,
}

impl DuckDBCatalog {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

type Row = [Option<String>];

fn text(row: &Row, i: usize) -> Option<&str> {
    row.get(i).and_then(|c| c.as_deref())
}

fn required<'a>(row: &'a Row, i: usize, what: &str) -> Result<&'a str, EtlError> {
    text(row, i).ok_or_else(|| EtlError::InternalError(format!("catalog row is missing {}", what)))
}

fn timestamp(raw: &str) -> Result<DateTime<Utc>, EtlError> {
    parse_datetime(raw)
        .map(|ts| ts.and_utc())
        .ok_or_else(|| EtlError::InternalError(format!("invalid catalog timestamp '{}'", raw)))
}

fn number<T: FromStr>(row: &Row, i: usize) -> Result<Option<T>, EtlError> {
    match text(row, i) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| EtlError::InternalError(format!("invalid catalog number '{}'", raw))),
    }
}

fn flag(row: &Row, i: usize) -> bool {
    text(row, i).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn opt_text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or_default()
}

fn job_from_row(row: &Row) -> Result<JobDefinition, EtlError> {
    let name = required(row, 0, "job_name")?.to_string();
    let source = match required(row, 1, "source_kind")? {
        "file" => SourceSpec::File {
            format: FileFormat::from_str(required(row, 2, "source_format")?)?,
            location: required(row, 3, "source_location")?.to_string(),
        },
        "table" => SourceSpec::Table {
            schema: required(row, 4, "source_schema")?.to_string(),
            table: required(row, 5, "source_table")?.to_string(),
            change_column: text(row, 6).map(str::to_string),
        },
        other => {
            return Err(DomainError::Configuration(format!(
                "job '{}' has unknown source kind '{}'",
                name, other
            ))
            .into());
        }
    };
    Ok(JobDefinition {
        source,
        target_schema: required(row, 7, "target_schema")?.to_string(),
        target_table: required(row, 8, "target_table")?.to_string(),
        load_type: LoadType::from_str(required(row, 9, "load_type")?)?,
        scd_type: ScdType::from_str(required(row, 10, "scd_type")?)?,
        reject_threshold: number(row, 11)?,
        name,
    })
}

fn mapping_from_row(row: &Row) -> Result<ColumnMapping, EtlError> {
    Ok(ColumnMapping {
        job_name: required(row, 0, "job_name")?.to_string(),
        source_column: required(row, 1, "source_column")?.to_string(),
        target_column: required(row, 2, "target_column")?.to_string(),
        data_type: DataType::from_str(required(row, 3, "data_type")?)?,
        length: number(row, 4)?,
        precision: number(row, 5)?,
        scale: number(row, 6)?,
        nullable: flag(row, 7),
        primary_key: flag(row, 8),
        foreign_key: flag(row, 9),
        reference_table: text(row, 10).map(str::to_string),
    })
}

fn audit_from_row(row: &Row) -> Result<AuditRecord, EtlError> {
    Ok(AuditRecord {
        id: number(row, 0)?.unwrap_or_default(),
        job_name: required(row, 1, "job_name")?.to_string(),
        stage: Layer::from_str(required(row, 2, "stage")?)?,
        start_time: timestamp(required(row, 3, "start_time")?)?,
        end_time: text(row, 4).map(timestamp).transpose()?,
        row_count: number(row, 5)?.unwrap_or_default(),
        reject_count: number(row, 6)?.unwrap_or_default(),
        status: AuditStatus::from_str(required(row, 7, "status")?)?,
        message: text(row, 8).map(str::to_string),
    })
}

fn ts_param(at: DateTime<Utc>) -> Value {
    Value::timestamp(at)
}

#[async_trait]
impl CatalogStore for DuckDBCatalog {
    async fn initialize(&self) -> Result<(), EtlError> {
        self.connector.execute(CATALOG_DDL).await
    }

    #[instrument(skip(self, job, mappings), fields(job = %job.name))]
    async fn save_job(&self, job: &JobDefinition, mappings: &MappingSet) -> Result<(), EtlError> {
        let name = Value::from(job.name.as_str());
        let (kind, format, location, schema, table, change) = match &job.source {
            SourceSpec::File { format, location } => (
                "file",
                Value::from(format.as_str()),
                Value::from(location.as_str()),
                Value::Null,
                Value::Null,
                Value::Null,
            ),
            SourceSpec::Table {
                schema,
                table,
                change_column,
            } => (
                "table",
                Value::Null,
                Value::Null,
                Value::from(schema.as_str()),
                Value::from(table.as_str()),
                opt_text(change_column),
            ),
        };

        let mapping_rows = mappings
            .columns()
            .iter()
            .enumerate()
            .map(|(i, m)| {
                vec![
                    name.clone(),
                    Value::Int(i as i64),
                    Value::from(m.source_column.as_str()),
                    Value::from(m.target_column.as_str()),
                    Value::from(m.data_type.to_string()),
                    Value::from(m.length.map(i64::from)),
                    Value::from(m.precision.map(i64::from)),
                    Value::from(m.scale.map(i64::from)),
                    Value::Bool(m.nullable),
                    Value::Bool(m.primary_key),
                    Value::Bool(m.foreign_key),
                    opt_text(&m.reference_table),
                ]
            })
            .collect::<Vec<_>>();

        let mut statements = vec![
            Statement::bound(
                "DELETE FROM layerline.column_mappings WHERE job_name = ?",
                vec![name.clone()],
            ),
            Statement::bound(
                "DELETE FROM layerline.jobs WHERE job_name = ?",
                vec![name.clone()],
            ),
            Statement::bound(
                "INSERT INTO layerline.jobs VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    name.clone(),
                    Value::from(kind),
                    format,
                    location,
                    schema,
                    table,
                    change,
                    Value::from(job.target_schema.as_str()),
                    Value::from(job.target_table.as_str()),
                    Value::from(job.load_type.as_str()),
                    Value::from(job.scd_type.as_str()),
                    job.reject_threshold.map(Value::Float).unwrap_or_default(),
                ],
            ),
        ];
        if !mapping_rows.is_empty() {
            statements.push(Statement::batch(
                "INSERT INTO layerline.column_mappings VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                mapping_rows,
            ));
        }

        self.connector.execute_transaction(&statements).await?;
        Ok(())
    }

    async fn job_names(&self) -> Result<Vec<String>, EtlError> {
        let result = self
            .connector
            .query("SELECT job_name FROM layerline.jobs ORDER BY job_name", &[])
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn job(&self, name: &str) -> Result<Option<JobDefinition>, EtlError> {
        let result = self
            .connector
            .query(
                "SELECT job_name, source_kind, source_format, source_location, source_schema, \
                 source_table, change_column, target_schema, target_table, load_type, scd_type, \
                 CAST(reject_threshold AS VARCHAR) \
                 FROM layerline.jobs WHERE job_name = ?",
                &[Value::from(name)],
            )
            .await?;
        result.rows.first().map(|row| job_from_row(row)).transpose()
    }

    async fn mappings(&self, job_name: &str) -> Result<MappingSet, EtlError> {
        let result = self
            .connector
            .query(
                "SELECT job_name, source_column, target_column, data_type, \
                 CAST(length AS VARCHAR), CAST(\"precision\" AS VARCHAR), CAST(scale AS VARCHAR), \
                 CAST(is_nullable AS VARCHAR), CAST(is_primary_key AS VARCHAR), \
                 CAST(is_foreign_key AS VARCHAR), reference_table \
                 FROM layerline.column_mappings WHERE job_name = ? ORDER BY ordinal",
                &[Value::from(job_name)],
            )
            .await?;
        let columns = result
            .rows
            .iter()
            .map(|row| mapping_from_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MappingSet::new(columns))
    }

    async fn open_audit(
        &self,
        job_name: &str,
        stage: Layer,
        start_time: DateTime<Utc>,
    ) -> Result<i64, EtlError> {
        let result = self
            .connector
            .query(
                "INSERT INTO layerline.job_audit (job_name, stage, start_time, status) \
                 VALUES (?, ?, CAST(? AS TIMESTAMP), ?) RETURNING CAST(id AS VARCHAR)",
                &[
                    Value::from(job_name),
                    Value::from(stage.as_str()),
                    ts_param(start_time),
                    Value::from(AuditStatus::Running.as_str()),
                ],
            )
            .await?;
        result
            .scalar()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| EtlError::InternalError("audit insert returned no id".into()))
    }

    async fn close_audit(&self, id: i64, closure: &AuditClosure) -> Result<AuditRecord, EtlError> {
        let sql = format!(
            "UPDATE layerline.job_audit \
             SET end_time = CAST(? AS TIMESTAMP), status = ?, row_count = ?, reject_count = ?, message = ? \
             WHERE id = ? AND end_time IS NULL RETURNING {}",
            AUDIT_COLUMNS
        );
        let result = self
            .connector
            .query(
                &sql,
                &[
                    ts_param(closure.end_time),
                    Value::from(closure.status.as_str()),
                    Value::Int(closure.row_count as i64),
                    Value::Int(closure.reject_count as i64),
                    opt_text(&closure.message),
                    Value::Int(id),
                ],
            )
            .await?;

        match result.rows.first() {
            Some(row) => audit_from_row(row),
            None => {
                let exists = self
                    .connector
                    .query(
                        "SELECT count(*) FROM layerline.job_audit WHERE id = ?",
                        &[Value::Int(id)],
                    )
                    .await?;
                if exists.scalar() == Some("0") {
                    Err(EtlError::InternalError(format!("unknown audit record {}", id)))
                } else {
                    Err(DomainError::AuditAlreadyClosed(id).into())
                }
            }
        }
    }

    async fn audit_history(
        &self,
        job_name: &str,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, EtlError> {
        let sql = format!(
            "SELECT {} FROM layerline.job_audit WHERE job_name = ? \
             ORDER BY start_time DESC, id DESC LIMIT {}",
            AUDIT_COLUMNS, limit
        );
        let result = self.connector.query(&sql, &[Value::from(job_name)]).await?;
        result.rows.iter().map(|row| audit_from_row(row)).collect()
    }

    async fn watermark(
        &self,
        job_name: &str,
        stage: Layer,
    ) -> Result<Option<DateTime<Utc>>, EtlError> {
        let result = self
            .connector
            .query(
                "SELECT CAST(max(last_load_time) AS VARCHAR) FROM layerline.load_watermark \
                 WHERE job_name = ? AND stage = ?",
                &[Value::from(job_name), Value::from(stage.as_str())],
            )
            .await?;
        result.scalar().map(timestamp).transpose()
    }

    async fn advance_watermark(
        &self,
        job_name: &str,
        stage: Layer,
        at: DateTime<Utc>,
    ) -> Result<(), EtlError> {
        let at = match self.watermark(job_name, stage).await? {
            Some(existing) if existing > at => existing,
            _ => at,
        };
        let key = vec![Value::from(job_name), Value::from(stage.as_str())];
        let mut insert = key.clone();
        insert.push(ts_param(at));

        self.connector
            .execute_transaction(&[
                Statement::bound(
                    "DELETE FROM layerline.load_watermark WHERE job_name = ? AND stage = ?",
                    key,
                ),
                Statement::bound(
                    "INSERT INTO layerline.load_watermark VALUES (?, ?, CAST(? AS TIMESTAMP))",
                    insert,
                ),
            ])
            .await?;
        Ok(())
    }

    async fn watermarks(&self, job_name: &str) -> Result<Vec<Watermark>, EtlError> {
        let result = self
            .connector
            .query(
                "SELECT stage, CAST(last_load_time AS VARCHAR) FROM layerline.load_watermark \
                 WHERE job_name = ?",
                &[Value::from(job_name)],
            )
            .await?;
        let mut marks = result
            .rows
            .iter()
            .map(|row| {
                Ok(Watermark {
                    job_name: job_name.to_string(),
                    stage: Layer::from_str(required(row, 0, "stage")?)?,
                    last_load_time: timestamp(required(row, 1, "last_load_time")?)?,
                })
            })
            .collect::<Result<Vec<_>, EtlError>>()?;
        marks.sort_by_key(|w| w.stage);
        Ok(marks)
    }

    async fn column_lengths(&self, table: &TableRef) -> Result<HashMap<String, u32>, EtlError> {
        let result = self
            .connector
            .query(
                "SELECT column_name, CAST(max_length AS VARCHAR) FROM layerline.column_lengths \
                 WHERE schema_name = ? AND table_name = ?",
                &[Value::from(table.schema.as_str()), Value::from(table.table.as_str())],
            )
            .await?;
        result
            .rows
            .iter()
            .map(|row| {
                let column = required(row, 0, "column_name")?.to_string();
                let length = number::<u32>(row, 1)?.ok_or_else(|| {
                    EtlError::InternalError(format!("no length recorded for '{}'", column))
                })?;
                Ok((column, length))
            })
            .collect()
    }

    #[instrument(skip(self, lengths), fields(table = %table, columns = lengths.len()))]
    async fn record_column_lengths(
        &self,
        table: &TableRef,
        lengths: &[(String, u32)],
    ) -> Result<(), EtlError> {
        let key = vec![Value::from(table.schema.as_str()), Value::from(table.table.as_str())];
        let mut statements = vec![Statement::bound(
            "DELETE FROM layerline.column_lengths WHERE schema_name = ? AND table_name = ?",
            key.clone(),
        )];
        if !lengths.is_empty() {
            statements.push(Statement::batch(
                "INSERT INTO layerline.column_lengths VALUES (?, ?, ?, ?)",
                lengths
                    .iter()
                    .map(|(column, length)| {
                        let mut row = key.clone();
                        row.push(Value::from(column.as_str()));
                        row.push(Value::Int(i64::from(*length)));
                        row
                    })
                    .collect(),
            ));
        }
        self.connector.execute_transaction(&statements).await?;
        Ok(())
    }
}
