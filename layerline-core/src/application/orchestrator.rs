// layerline-core/src/application/orchestrator.rs
//
// Runs a job's three stages in layer order. Every stage attempt is wrapped
// in an audit record; a failure stops the run and leaves every watermark
// where it was, so re-running the job retries the same window.

use chrono::{DateTime, SubsecRound, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, instrument, warn};

use crate::application::materialization::SchemaMaterializer;
use crate::application::recorder::AuditRecorder;
use crate::application::transform::{
    CuratedToProcessed, RawToCurated, SourceToRaw, StageContext, TransformEngine,
};
use crate::domain::audit::AuditStatus;
use crate::domain::error::DomainError;
use crate::domain::job::{JobDefinition, Layer, LayerSchemas};
use crate::domain::load_mode::{LoadDecision, LoadModeResolver, WatermarkAdvance};
use crate::domain::mapping::MappingSet;
use crate::domain::reject::{RejectPolicy, StageOutcome};
use crate::domain::run_state::RunState;
use crate::error::EtlError;
use crate::ports::catalog::CatalogStore;
use crate::ports::connector::Connector;
use crate::ports::source::SourceReader;

/// One stage attempt as the caller sees it.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Layer,
    pub status: AuditStatus,
    pub accepted: u64,
    pub rejected: u64,
    pub message: String,
    pub audit_id: Option<i64>,
    #[serde(skip)]
    advance: WatermarkAdvance,
}

/// Final state of one job run plus per-stage figures.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job: String,
    pub state: RunState,
    pub run_start: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    /// Why the run failed, when it did.
    pub message: Option<String>,
}

impl RunReport {
    fn new(job: &str, run_start: DateTime<Utc>) -> Self {
        Self {
            job: job.to_string(),
            state: RunState::Pending,
            run_start,
            finished_at: run_start,
            stages: Vec::new(),
            message: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn stage(&self, stage: Layer) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Ends the run as Failed. A report already terminal keeps its state
    /// and records the refused transition in the message.
    fn fail(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        if let Err(e) = self.state.transition(RunState::Failed) {
            warn!(job = %self.job, "{}", e);
            message = format!("{} ({})", message, e);
        }
        error!(job = %self.job, "Run failed: {}", message);
        self.message = Some(message);
        self.finished_at = Utc::now();
    }
}

pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    catalog: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
    engines: Vec<Box<dyn TransformEngine>>,
    schemas: LayerSchemas,
    default_threshold: Option<f64>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancelled: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn Connector>,
        catalog: Arc<dyn CatalogStore>,
        recorder: AuditRecorder,
        source: Arc<dyn SourceReader>,
    ) -> Self {
        Self {
            connector,
            catalog,
            recorder,
            engines: vec![
                Box::new(SourceToRaw::new(source)),
                Box::new(RawToCurated),
                Box::new(CuratedToProcessed),
            ],
            schemas: LayerSchemas::default(),
            default_threshold: None,
            locks: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_schemas(mut self, schemas: LayerSchemas) -> Self {
        self.schemas = schemas;
        self
    }

    /// Reject ratio applied to jobs that set none themselves.
    pub fn with_reject_threshold(mut self, threshold: Option<f64>) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Stops every run before its next stage. A stage already running
    /// finishes first.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn lock_for(&self, job_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(job_name.to_string()).or_default().clone()
    }

    /// Runs distinct jobs concurrently, at most `concurrency` at a time.
    /// Reports come back in the order of `job_names`.
    pub async fn run_many(&self, job_names: &[String], concurrency: usize) -> Vec<RunReport> {
        futures::stream::iter(job_names.iter().map(|name| self.run_job(name)))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Runs one job to a terminal state. Failures are reported, not
    /// returned: the report always carries the final state and the figures
    /// of every stage that started.
    #[instrument(skip(self))]
    pub async fn run_job(&self, job_name: &str) -> RunReport {
        let lock = self.lock_for(job_name);
        let _guard = lock.lock_owned().await;

        // The store keeps microseconds; a finer stamp would never compare equal.
        let run_start = Utc::now().trunc_subsecs(6);
        let mut report = RunReport::new(job_name, run_start);

        let (job, mappings) = match self.load(job_name).await {
            Ok(loaded) => loaded,
            Err(e) => {
                report.fail(e.to_string());
                return report;
            }
        };
        let policy = RejectPolicy {
            threshold: job.reject_threshold.or(self.default_threshold),
        };

        for engine in &self.engines {
            let stage = engine.stage();
            if self.is_cancelled() {
                report.fail(DomainError::Cancelled(stage.to_string()).to_string());
                return report;
            }
            if let Err(e) = report.state.transition(RunState::running(stage)) {
                report.fail(e.to_string());
                return report;
            }

            let stage_report = self
                .run_stage(engine.as_ref(), &job, &mappings, policy, run_start)
                .await;
            let failed = stage_report.status != AuditStatus::Success;
            let message = stage_report.message.clone();
            report.stages.push(stage_report);
            if failed {
                report.fail(format!("{} stage failed: {}", stage, message));
                return report;
            }
        }

        // Still RunningProcessed: a failed watermark update fails the run.
        let marks: Vec<(Layer, DateTime<Utc>)> = report
            .stages
            .iter()
            .filter_map(|s| s.advance.target(run_start).map(|at| (s.stage, at)))
            .collect();
        if let Err(e) = self.recorder.advance(&job.name, &marks).await {
            report.fail(format!("watermark update failed: {}", e));
            return report;
        }
        if let Err(e) = report.state.transition(RunState::Succeeded) {
            report.fail(e.to_string());
            return report;
        }
        report.finished_at = Utc::now();
        info!(job = %job.name, "Run succeeded");
        report
    }

    async fn load(&self, job_name: &str) -> Result<(JobDefinition, MappingSet), EtlError> {
        let job = self
            .catalog
            .job(job_name)
            .await?
            .ok_or_else(|| DomainError::UnknownJob(job_name.to_string()))?;
        let mappings = self.catalog.mappings(job_name).await?;
        mappings.validate_for(&job)?;
        Ok((job, mappings))
    }

    async fn decide(
        &self,
        job: &JobDefinition,
        stage: Layer,
        run_start: DateTime<Utc>,
    ) -> Result<LoadDecision, EtlError> {
        let watermark = self.recorder.watermark(&job.name, stage).await?;
        let decision = LoadModeResolver::resolve(job, stage, watermark, run_start);
        if let Some(warning) = &decision.warning {
            warn!("{}", warning);
        }
        Ok(decision)
    }

    /// Materializes the stage's table and runs the engine, inside one
    /// audit record.
    async fn run_stage(
        &self,
        engine: &dyn TransformEngine,
        job: &JobDefinition,
        mappings: &MappingSet,
        policy: RejectPolicy,
        run_start: DateTime<Utc>,
    ) -> StageReport {
        let stage = engine.stage();
        let mut stage_report = StageReport {
            stage,
            status: AuditStatus::Failed,
            accepted: 0,
            rejected: 0,
            message: String::new(),
            audit_id: None,
            advance: WatermarkAdvance::Hold,
        };

        let audit_id = match self.recorder.open(&job.name, stage, Utc::now()).await {
            Ok(id) => id,
            Err(e) => {
                stage_report.message = format!("could not open audit record: {}", e);
                return stage_report;
            }
        };
        stage_report.audit_id = Some(audit_id);

        let result = self.execute(engine, job, mappings, policy, run_start).await;
        let (status, outcome, message) = match result {
            Ok((outcome, warning)) => {
                let mut message = outcome.message();
                if let Some(warning) = warning {
                    message = format!("{} | {}", message, warning);
                }
                (AuditStatus::Success, outcome, message)
            }
            Err(e) => (AuditStatus::Failed, StageOutcome::default(), e.to_string()),
        };

        match self
            .recorder
            .close(
                audit_id,
                status,
                outcome.accepted,
                outcome.rejected(),
                Some(message.clone()),
            )
            .await
        {
            Ok(_) => {
                stage_report.status = status;
                stage_report.message = message;
                stage_report.advance = outcome.watermark;
            }
            Err(e) => {
                stage_report.message = format!("{} (audit close failed: {})", message, e);
            }
        }
        stage_report.accepted = outcome.accepted;
        stage_report.rejected = outcome.rejected();
        stage_report
    }

    async fn execute(
        &self,
        engine: &dyn TransformEngine,
        job: &JobDefinition,
        mappings: &MappingSet,
        policy: RejectPolicy,
        run_start: DateTime<Utc>,
    ) -> Result<(StageOutcome, Option<String>), EtlError> {
        let stage = engine.stage();
        let connector = self.connector.as_ref();

        let table = job.table_for(stage, &self.schemas);
        let recorded = self.catalog.column_lengths(&table).await?;
        let materialized = SchemaMaterializer::materialize(
            connector,
            job,
            mappings,
            stage,
            &self.schemas,
            &recorded,
            run_start,
        )
        .await?;
        // The DDL is applied by now, so the lengths are stored even if the
        // stage itself fails.
        let lengths: HashMap<String, u32> = materialized.lengths.iter().cloned().collect();
        if lengths != recorded {
            self.catalog
                .record_column_lengths(&table, &materialized.lengths)
                .await?;
        }
        let decision = self.decide(job, stage, run_start).await?;

        let ctx = StageContext {
            job,
            mappings,
            schemas: &self.schemas,
            decision: &decision,
            run_start,
            policy,
        };
        let mut outcome = engine.run(&ctx, connector).await?;
        for warning in materialized.warnings {
            outcome.note(warning);
        }
        Ok((outcome, decision.warning))
    }
}
