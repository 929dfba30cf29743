// layerline-core/src/application/transform/raw_curated.rs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::application::materialization::LayerTable;
use crate::application::table_io;
use crate::application::transform::{StageContext, TransformEngine};
use crate::domain::job::{Layer, quote_ident};
use crate::domain::load_mode::{LOADED_AT_COLUMN, SEQ_COLUMN};
use crate::domain::mapping::{ColumnContract, MappingSet};
use crate::domain::reject::{RejectLog, RejectReason, StageOutcome};
use crate::domain::scd::{ActiveIndex, MergeSpec, ScdMergeEngine};
use crate::domain::value::{Record, Value};
use crate::error::EtlError;
use crate::ports::connector::Connector;

/// Known values of one referenced column, in canonical form.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    pub reference: String,
    pub values: HashSet<String>,
}

/// FK column (target name) -> values it may take.
pub type References = HashMap<String, ReferenceSet>;

/// Casts, validates and deduplicates Raw rows. Returns the accepted rows in
/// arrival order, one per key, plus every rejected row.
pub fn curate(
    rows: Vec<Record>,
    mappings: &MappingSet,
    references: &References,
) -> (Vec<Record>, RejectLog) {
    let mut rejects = RejectLog::default();
    let mut accepted = Vec::with_capacity(rows.len());

    'rows: for (i, row) in rows.into_iter().enumerate() {
        let typed = match mappings.cast_record(&row) {
            Ok(typed) => typed,
            Err(reason) => {
                rejects.push(i, reason);
                continue;
            }
        };
        for (column, set) in references {
            let Some(value) = typed.get(column).and_then(Value::render) else {
                continue;
            };
            if !set.values.contains(&value) {
                rejects.push(
                    i,
                    RejectReason::ForeignKeyViolation {
                        column: column.clone(),
                        value,
                        reference: set.reference.clone(),
                    },
                );
                continue 'rows;
            }
        }
        accepted.push(typed);
    }

    let spec = MergeSpec::from_mappings(mappings);
    if spec.has_key() {
        // Keys were validated as non-null by the cast, so dedupe rejects nothing.
        let (deduped, key_rejects) = ScdMergeEngine::new(&spec).dedupe(accepted);
        rejects.extend(key_rejects);
        accepted = deduped;
    }
    (accepted, rejects)
}

/// Raw -> Curated: typed, validated and keyed.
pub struct RawToCurated;

impl RawToCurated {
    /// Loads the allowed values of every FK column whose referenced table
    /// exists. Missing references skip the check with a note.
    async fn load_references(
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
        outcome: &mut StageOutcome,
    ) -> Result<References, EtlError> {
        let mut references = References::new();
        for column in ctx.mappings.foreign_keys() {
            let Some(reference) = ctx.mappings.reference_of(column, &ctx.schemas.curated) else {
                continue;
            };
            let referenced = connector.fetch_columns(&reference).await?;
            let Some(target) = referenced
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&column.target_column))
            else {
                let note = format!(
                    "FK check on '{}' skipped: {}.{} not found",
                    column.target_column, reference, column.target_column
                );
                warn!("{}", note);
                outcome.note(note);
                continue;
            };

            let sql = format!(
                "SELECT DISTINCT CAST({col} AS VARCHAR) FROM {table} WHERE {col} IS NOT NULL",
                col = quote_ident(&target.name),
                table = reference.qualified()
            );
            let result = connector.query(&sql, &[]).await?;
            let values = result
                .rows
                .into_iter()
                .filter_map(|row| row.into_iter().next().flatten())
                .filter_map(|raw| column.cast(&Value::Text(raw)).ok())
                .filter_map(|value| value.render())
                .collect();
            references.insert(
                column.target_column.clone(),
                ReferenceSet {
                    reference: reference.to_string(),
                    values,
                },
            );
        }
        Ok(references)
    }
}

#[async_trait]
impl TransformEngine for RawToCurated {
    fn stage(&self) -> Layer {
        Layer::Curated
    }

    #[instrument(skip_all, fields(job = %ctx.job.name))]
    async fn run(
        &self,
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
    ) -> Result<StageOutcome, EtlError> {
        let raw = ctx.job.table_for(Layer::Raw, ctx.schemas);
        let table = LayerTable::plan(ctx.job, ctx.mappings, Layer::Curated, ctx.schemas);
        let mut outcome = StageOutcome::default();

        let input = table_io::read_rows(
            connector,
            &raw,
            ctx.decision.predicate.sql_filter(LOADED_AT_COLUMN),
            &[LOADED_AT_COLUMN, SEQ_COLUMN],
        )
        .await?;
        let read = input.len();

        let references = Self::load_references(ctx, connector, &mut outcome).await?;
        let (mut rows, rejects) = curate(input, ctx.mappings, &references);
        let collapsed = read.saturating_sub(rejects.len() + rows.len());
        if collapsed > 0 {
            outcome.note(format!("{} duplicate key rows collapsed", collapsed));
        }
        outcome.accepted = rows.len() as u64;
        outcome.rejects = rejects;
        ctx.policy.check(Layer::Curated, &outcome)?;

        let spec = MergeSpec::from_mappings(ctx.mappings);
        let statements = if ctx.decision.replace_target || !spec.has_key() {
            let mut statements = Vec::new();
            if ctx.decision.replace_target {
                statements.push(table_io::truncate(&table));
            }
            table_io::stamp(&mut rows, ctx.run_start);
            statements.extend(table_io::insert(
                &table,
                &table_io::insert_columns(&table),
                &rows,
            ));
            statements
        } else {
            let current = table_io::current_rows(connector, &table.table, ctx.mappings, false).await?;
            let mut index = ActiveIndex::build(current, &spec);
            let plan = ScdMergeEngine::new(&spec).merge_type1(rows, &mut index);
            outcome.note(format!(
                "{} inserted, {} updated, {} unchanged",
                plan.inserts.len(),
                plan.updates.len(),
                plan.unchanged
            ));
            table_io::plan_statements(
                &table,
                &plan,
                &spec.key_columns,
                ctx.run_start,
                Some(ctx.run_start),
            )
        };

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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::materialization::SchemaMaterializer;
    use crate::domain::job::{
        FileFormat, JobDefinition, LayerSchemas, LoadType, ScdType, SourceSpec,
    };
    use crate::domain::load_mode::{LoadDecision, LoadMode, LoadPredicate};
    use crate::domain::mapping::{ColumnMapping, DataType};
    use crate::domain::reject::RejectPolicy;
    use crate::domain::value::record;
    use crate::infrastructure::adapters::duckdb::DuckDBConnector;
    use anyhow::Result;
    use chrono::{DateTime, TimeZone, Utc};

    fn column(target: &str, data_type: DataType) -> ColumnMapping {
        ColumnMapping {
            job_name: "JOB_EMP".into(),
            source_column: target.into(),
            target_column: target.into(),
            data_type,
            length: data_type.is_varlen().then_some(10),
            precision: None,
            scale: None,
            nullable: true,
            primary_key: false,
            foreign_key: false,
            reference_table: None,
        }
    }

    fn mappings() -> MappingSet {
        let mut id = column("EmployeeID", DataType::Int);
        id.primary_key = true;
        let mut dept = column("DeptID", DataType::Int);
        dept.foreign_key = true;
        dept.reference_table = Some("department".into());
        let mut status = column("Status", DataType::Varchar);
        status.nullable = false;
        MappingSet::new(vec![id, dept, status])
    }

    fn job(load_type: LoadType) -> JobDefinition {
        JobDefinition {
            name: "JOB_EMP".into(),
            source: SourceSpec::File {
                format: FileFormat::Csv,
                location: "emp".into(),
            },
            target_schema: "processed".into(),
            target_table: "employee".into(),
            load_type,
            scd_type: ScdType::Type2,
            reject_threshold: None,
        }
    }

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).single().unwrap()
    }

    fn raw(id: &str, dept: &str, status: &str) -> Record {
        record([("EmployeeID", id), ("DeptID", dept), ("Status", status)])
    }

    fn departments(values: &[&str]) -> References {
        References::from([(
            "DeptID".to_string(),
            ReferenceSet {
                reference: "curated.department".into(),
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        )])
    }

    #[test]
    fn test_curate_rejects_each_rule_once() {
        let rows = vec![
            raw("101", "10", "Active"),
            raw("10x", "10", "Active"),
            raw("102", "10", "null"),
            raw("103", "99", "Active"),
            raw("104", "", "Active"),
        ];
        let (accepted, rejects) = curate(rows, &mappings(), &departments(&["10"]));

        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[1]["DeptID"], Value::Null);
        let codes: Vec<_> = rejects.entries().iter().map(|r| r.reason.code()).collect();
        assert_eq!(codes, vec!["cast_failure", "null_violation", "fk_violation"]);
    }

    #[test]
    fn test_curate_keeps_last_row_per_key() {
        let rows = vec![
            raw("101", "10", "Active"),
            raw("102", "10", "Active"),
            raw("101", "10", "OnLeave"),
        ];
        let (accepted, rejects) = curate(rows, &mappings(), &References::new());
        assert!(rejects.is_empty());
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0]["Status"], Value::from("OnLeave"));
    }

    async fn setup(connector: &DuckDBConnector, job: &JobDefinition) -> Result<()> {
        let schemas = LayerSchemas::default();
        for layer in [Layer::Raw, Layer::Curated] {
            SchemaMaterializer::materialize(
                connector,
                job,
                &mappings(),
                layer,
                &schemas,
                &Default::default(),
                at(1),
            )
            .await?;
        }
        Ok(())
    }

    async fn load_raw(connector: &DuckDBConnector, rows: &[(&str, &str, &str)], d: u32) -> Result<()> {
        for (seq, (id, dept, status)) in rows.iter().enumerate() {
            connector
                .execute(&format!(
                    "INSERT INTO raw.employee VALUES ('{}', '{}', '{}', TIMESTAMP '2024-01-{:02} 00:00:00', {})",
                    id, dept, status, d, seq
                ))
                .await?;
        }
        Ok(())
    }

    async fn run_stage(
        connector: &DuckDBConnector,
        job: &JobDefinition,
        decision: &LoadDecision,
        d: u32,
    ) -> Result<StageOutcome, EtlError> {
        let mappings = mappings();
        let schemas = LayerSchemas::default();
        let ctx = StageContext {
            job,
            mappings: &mappings,
            schemas: &schemas,
            decision,
            run_start: at(d),
            policy: RejectPolicy::default(),
        };
        RawToCurated.run(&ctx, connector).await
    }

    #[tokio::test]
    async fn test_missing_reference_table_skips_fk_check() -> Result<()> {
        let connector = DuckDBConnector::new(":memory:")?;
        let job = job(LoadType::Full);
        setup(&connector, &job).await?;
        load_raw(&connector, &[("101", "99", "Active"), ("102", "10", "")], 1).await?;

        let full = LoadDecision {
            mode: LoadMode::Full,
            predicate: LoadPredicate::Unbounded,
            replace_target: true,
            warning: None,
        };
        let outcome = run_stage(&connector, &job, &full, 2).await?;
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected(), 1);
        assert!(outcome.message().contains("FK check on 'DeptID' skipped"));
        Ok(())
    }

    #[tokio::test]
    async fn test_incremental_upserts_by_key() -> Result<()> {
        let connector = DuckDBConnector::new(":memory:")?;
        let job = job(LoadType::Incremental);
        setup(&connector, &job).await?;

        load_raw(&connector, &[("101", "10", "Active"), ("102", "10", "Active")], 1).await?;
        let first = LoadDecision {
            mode: LoadMode::Full,
            predicate: LoadPredicate::Unbounded,
            replace_target: false,
            warning: None,
        };
        run_stage(&connector, &job, &first, 2).await?;

        load_raw(&connector, &[("101", "10", "OnLeave")], 3).await?;
        let next = LoadDecision {
            mode: LoadMode::Incremental,
            predicate: LoadPredicate::After(at(2)),
            replace_target: false,
            warning: None,
        };
        let outcome = run_stage(&connector, &job, &next, 4).await?;
        assert_eq!(outcome.accepted, 1);

        let result = connector
            .query(
                "SELECT \"EmployeeID\", \"Status\", CAST(\"_loaded_at\" AS DATE) \
                 FROM curated.employee ORDER BY 1",
                &[],
            )
            .await?;
        assert_eq!(
            result.rows,
            vec![
                vec![Some("101".into()), Some("OnLeave".into()), Some("2024-01-04".into())],
                vec![Some("102".into()), Some("Active".into()), Some("2024-01-02".into())],
            ]
        );
        Ok(())
    }
}
