// layerline-core/src/application/transform/mod.rs
//
// One engine per layer boundary. Each reads its input, rejects bad rows
// individually, checks the reject policy and only then writes, inside one
// store transaction.

pub mod curated_processed;
pub mod raw_curated;
pub mod source_raw;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::job::{JobDefinition, Layer, LayerSchemas};
use crate::domain::load_mode::LoadDecision;
use crate::domain::mapping::MappingSet;
use crate::domain::reject::{RejectPolicy, StageOutcome};
use crate::error::EtlError;
use crate::ports::connector::Connector;

pub use curated_processed::CuratedToProcessed;
pub use raw_curated::RawToCurated;
pub use source_raw::SourceToRaw;

/// Everything a stage needs about the job being run.
pub struct StageContext<'a> {
    pub job: &'a JobDefinition,
    pub mappings: &'a MappingSet,
    pub schemas: &'a LayerSchemas,
    pub decision: &'a LoadDecision,
    /// Start of the run: the `_loaded_at` stamp and the SCD `as_of` time.
    pub run_start: DateTime<Utc>,
    pub policy: RejectPolicy,
}

#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// The layer this engine fills.
    fn stage(&self) -> Layer;

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        connector: &dyn Connector,
    ) -> Result<StageOutcome, EtlError>;
}
