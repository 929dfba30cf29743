// layerline-core/src/application/transform/source_raw.rs

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::application::materialization::LayerTable;
use crate::application::table_io;
use crate::application::transform::{StageContext, TransformEngine};
use crate::domain::job::{FileFormat, Layer, SourceSpec, TableRef};
use crate::domain::load_mode::{LoadMode, WatermarkAdvance};
use crate::domain::mapping::MappingSet;
use crate::domain::reject::{RejectLog, RejectReason, StageOutcome};
use crate::domain::value::{Record, Value};
use crate::error::EtlError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::Connector;
use crate::ports::source::SourceReader;

/// Source rows renamed to their target columns, values still raw text.
#[derive(Debug, Default)]
pub struct Conformed {
    pub rows: Vec<Record>,
    pub rejects: RejectLog,
    /// Optional source columns no row carried.
    pub absent: BTreeSet<String>,
}

/// Exact field name first, then a case-insensitive match.
fn lookup<'r>(row: &'r Record, name: &str) -> Option<&'r Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(field, _)| field.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Renames every mapped source field. A row lacking a required field is
/// rejected; a lacking optional field lands as NULL. No value is coerced.
pub fn conform(batch: Vec<Record>, mappings: &MappingSet) -> Conformed {
    let mut out = Conformed::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    'rows: for (i, row) in batch.into_iter().enumerate() {
        let mut conformed = Record::new();
        for column in mappings.columns() {
            let value = match lookup(&row, &column.source_column) {
                Some(value) => {
                    seen.insert(column.source_column.as_str());
                    match value {
                        Value::Null | Value::Text(_) => value.clone(),
                        other => other.render().map(Value::Text).unwrap_or_default(),
                    }
                }
                None if !column.effective_nullable() => {
                    out.rejects.push(
                        i,
                        RejectReason::MissingColumn {
                            column: column.source_column.clone(),
                        },
                    );
                    continue 'rows;
                }
                None => Value::Null,
            };
            conformed.insert(column.target_column.clone(), value);
        }
        out.rows.push(conformed);
    }

    if !out.rows.is_empty() {
        out.absent = mappings
            .columns()
            .iter()
            .filter(|c| c.effective_nullable() && !seen.contains(c.source_column.as_str()))
            .map(|c| c.source_column.clone())
            .collect();
    }
    out
}

/// Source -> Raw: lands source rows untyped.
pub struct SourceToRaw {
    reader: Arc<dyn SourceReader>,
}

impl SourceToRaw {
    pub fn new(reader: Arc<dyn SourceReader>) -> Self {
        Self { reader }
    }

    async fn read_files(
        &self,
        ctx: &StageContext<'_>,
        format: FileFormat,
        location: &str,
        outcome: &mut StageOutcome,
    ) -> Result<Vec<Record>, EtlError> {
        let files = self.reader.discover(location, format).await?;
        if files.is_empty() {
            return Err(InfrastructureError::SourceError(format!(
                "no {} file found at '{}'",
                format.as_str(),
                location
            ))
            .into());
        }

        let admitted: Vec<_> = files
            .into_iter()
            .filter(|f| ctx.decision.predicate.admits(f.marker))
            .collect();
        // File dates, not the clock, bound the next window: a drop named for
        // an earlier day than this run still counts as new next time.
        outcome.watermark = WatermarkAdvance::newest(admitted.iter().map(|f| f.marker));
        if admitted.is_empty() {
            if let Some(cutoff) = ctx.decision.predicate.cutoff() {
                outcome.note(format!("no file newer than {}", cutoff.to_rfc3339()));
            }
            return Ok(Vec::new());
        }

        let mut batch = Vec::new();
        for file in &admitted {
            let rows = self.reader.read(file, format).await?;
            if rows.is_empty() {
                warn!("Skipping empty source file {}", file.path.display());
                outcome.note(format!("skipped empty file {}", file.path.display()));
                continue;
            }
            debug!("{} rows from {}", rows.len(), file.path.display());
            batch.extend(rows);
        }
        Ok(batch)
    }

    async fn read_table(
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
        source: TableRef,
        change_column: Option<&str>,
        outcome: &mut StageOutcome,
    ) -> Result<Vec<Record>, EtlError> {
        let filter = change_column.and_then(|c| ctx.decision.predicate.sql_filter(c));
        if change_column.is_none() && ctx.decision.mode == LoadMode::Incremental {
            outcome.note(format!("{} has no change column; read in full", source));
        }
        let order: Vec<&str> = change_column.into_iter().collect();
        table_io::read_rows(connector, &source, filter, &order).await
    }
}

#[async_trait]
impl TransformEngine for SourceToRaw {
    fn stage(&self) -> Layer {
        Layer::Raw
    }

    #[instrument(skip_all, fields(job = %ctx.job.name))]
    async fn run(
        &self,
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
    ) -> Result<StageOutcome, EtlError> {
        let table = LayerTable::plan(ctx.job, ctx.mappings, Layer::Raw, ctx.schemas);
        let mut outcome = StageOutcome::default();

        let batch = match &ctx.job.source {
            SourceSpec::File { format, location } => {
                self.read_files(ctx, *format, location, &mut outcome).await?
            }
            SourceSpec::Table {
                schema,
                table: source_table,
                change_column,
            } => {
                let source = TableRef::new(schema, source_table);
                Self::read_table(ctx, connector, source, change_column.as_deref(), &mut outcome)
                    .await?
            }
        };

        let conformed = conform(batch, ctx.mappings);
        for column in &conformed.absent {
            outcome.note(format!("source column '{}' absent, loaded as NULL", column));
        }
        outcome.accepted = conformed.rows.len() as u64;
        outcome.rejects = conformed.rejects;
        ctx.policy.check(Layer::Raw, &outcome)?;

        let mut rows = conformed.rows;
        table_io::stamp(&mut rows, ctx.run_start);

        let mut statements = Vec::new();
        if ctx.decision.replace_target {
            statements.push(table_io::truncate(&table));
        }
        if let Some(insert) = table_io::insert(&table, &table_io::insert_columns(&table), &rows) {
            statements.push(insert);
        }
        if !statements.is_empty() {
            connector.execute_transaction(&statements).await?;
        }

        info!(
            accepted = outcome.accepted,
            rejected = outcome.rejected(),
            "Loaded {}",
            table.table
        );
        Ok(outcome)
    }
}
