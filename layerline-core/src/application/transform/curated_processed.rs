// layerline-core/src/application/transform/curated_processed.rs

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::application::materialization::LayerTable;
use crate::application::table_io;
use crate::application::transform::{StageContext, TransformEngine};
use crate::domain::error::DomainError;
use crate::domain::job::{Layer, LoadType, ScdType};
use crate::domain::load_mode::{LOADED_AT_COLUMN, SEQ_COLUMN};
use crate::domain::reject::StageOutcome;
use crate::domain::scd::{ActiveIndex, MergeSpec, ScdMergeEngine};
use crate::error::EtlError;
use crate::ports::connector::{Connector, Statement};

/// Curated -> Processed: deduplicates by business key and hands the batch to
/// the SCD merge engine.
pub struct CuratedToProcessed;

#[async_trait]
impl TransformEngine for CuratedToProcessed {
    fn stage(&self) -> Layer {
        Layer::Processed
    }

    #[instrument(skip_all, fields(job = %ctx.job.name, scd = ctx.job.scd_type.as_str()))]
    async fn run(
        &self,
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
    ) -> Result<StageOutcome, EtlError> {
        let curated = ctx.job.table_for(Layer::Curated, ctx.schemas);
        let table = LayerTable::plan(ctx.job, ctx.mappings, Layer::Processed, ctx.schemas);
        let mut outcome = StageOutcome::default();

        // Arrival order: last write wins by (_loaded_at, _seq).
        let input = table_io::read_rows(
            connector,
            &curated,
            ctx.decision.predicate.sql_filter(LOADED_AT_COLUMN),
            &[LOADED_AT_COLUMN, SEQ_COLUMN],
        )
        .await?;
        let (typed, mut rejects) = table_io::typed_rows(input, ctx.mappings);

        let spec = MergeSpec::from_mappings(ctx.mappings);
        let engine = ScdMergeEngine::new(&spec);
        let batch = if spec.has_key() {
            let (deduped, key_rejects) = engine.dedupe(typed);
            rejects.extend(key_rejects);
            deduped
        } else {
            typed
        };

        let scd = ctx.job.scd_type;
        let merged = spec.has_key() && !(scd == ScdType::None && ctx.job.load_type == LoadType::Full);

        let statements: Vec<Statement> = if merged {
            let current = table_io::current_rows(
                connector,
                &table.table,
                ctx.mappings,
                scd == ScdType::Type2,
            )
            .await?;
            let mut index = ActiveIndex::build(current, &spec);
            let plan = engine.merge(scd, batch, &mut index, ctx.run_start);

            outcome.accepted = plan.written() + plan.unchanged as u64;
            outcome.note(format!(
                "{} inserted, {} updated, {} closed, {} unchanged",
                plan.inserts.len(),
                plan.updates.len(),
                plan.closes.len(),
                plan.unchanged
            ));
            rejects.extend(plan.rejects.clone());
            outcome.rejects = rejects;
            ctx.policy.check(Layer::Processed, &outcome)?;

            table_io::plan_statements(&table, &plan, &spec.key_columns, ctx.run_start, None)
        } else {
            if scd == ScdType::Type2 {
                return Err(DomainError::Configuration(format!(
                    "job '{}' uses SCD type 2 but has no business key",
                    ctx.job.name
                ))
                .into());
            }
            outcome.accepted = batch.len() as u64;
            outcome.rejects = rejects;
            ctx.policy.check(Layer::Processed, &outcome)?;

            let mut statements = Vec::new();
            if ctx.job.load_type == LoadType::Full {
                statements.push(table_io::truncate(&table));
            } else {
                outcome.note("no business key: rows appended");
            }
            statements.extend(table_io::insert(
                &table,
                &table_io::insert_columns(&table),
                &batch,
            ));
            statements
        };

        if !statements.is_empty() {
            connector.execute_transaction(&statements).await?;
        }
        info!(
            accepted = outcome.accepted,
            rejected = outcome.rejected(),
            "Merged into {}",
            table.table
        );
        Ok(outcome)
    }
}
