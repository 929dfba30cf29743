// layerline-core/src/domain/load_mode.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{JobDefinition, Layer, LoadType, quote_ident};
use crate::domain::value::TIMESTAMP_FORMAT;

/// Technical column stamped on Raw and Curated rows with the writing run's
/// start time. Incremental windows of the next layer filter on it.
pub const LOADED_AT_COLUMN: &str = "_loaded_at";
/// Arrival order of a row within one load.
pub const SEQ_COLUMN: &str = "_seq";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadMode {
    Full,
    Incremental,
}

/// Which rows a stage reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoadPredicate {
    Unbounded,
    /// Rows whose marker is strictly greater than the cutoff.
    After(DateTime<Utc>),
}

impl LoadPredicate {
    pub fn admits(&self, marker: DateTime<Utc>) -> bool {
        match self {
            LoadPredicate::Unbounded => true,
            LoadPredicate::After(cutoff) => marker > *cutoff,
        }
    }

    /// SQL filter on `column`, or `None` when every row qualifies.
    pub fn sql_filter(&self, column: &str) -> Option<String> {
        match self {
            LoadPredicate::Unbounded => None,
            LoadPredicate::After(cutoff) => Some(format!(
                "{} > TIMESTAMP '{}'",
                quote_ident(column),
                cutoff.naive_utc().format(TIMESTAMP_FORMAT)
            )),
        }
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        match self {
            LoadPredicate::Unbounded => None,
            LoadPredicate::After(cutoff) => Some(*cutoff),
        }
    }
}

/// Where a stage's watermark moves once the whole run succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkAdvance {
    /// To the run start, which every row this run stamped carries.
    #[default]
    RunStart,
    /// To the newest source marker the stage admitted.
    Marker(DateTime<Utc>),
    /// Nothing new was admitted: the watermark stays put.
    Hold,
}

impl WatermarkAdvance {
    /// Latest marker of `markers`, or `Hold` when there is none.
    pub fn newest(markers: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        markers
            .into_iter()
            .max()
            .map_or(WatermarkAdvance::Hold, WatermarkAdvance::Marker)
    }

    pub fn target(&self, run_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            WatermarkAdvance::RunStart => Some(run_start),
            WatermarkAdvance::Marker(marker) => Some(*marker),
            WatermarkAdvance::Hold => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadDecision {
    pub mode: LoadMode,
    pub predicate: LoadPredicate,
    /// Truncate the stage's target before writing.
    pub replace_target: bool,
    pub warning: Option<String>,
}

pub struct LoadModeResolver;

impl LoadModeResolver {
    /// Decides the read window of `stage` for `job`.
    ///
    /// Never writes the watermark; only the orchestrator advances it once a
    /// run succeeds.
    pub fn resolve(
        job: &JobDefinition,
        stage: Layer,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LoadDecision {
        // Processed is always merged, never truncated.
        let replaceable = stage != Layer::Processed;

        match job.load_type {
            LoadType::Full => LoadDecision {
                mode: LoadMode::Full,
                predicate: LoadPredicate::Unbounded,
                replace_target: replaceable,
                warning: None,
            },
            LoadType::Incremental => match watermark {
                None => LoadDecision {
                    mode: LoadMode::Full,
                    predicate: LoadPredicate::Unbounded,
                    replace_target: false,
                    warning: None,
                },
                Some(mark) if mark > now => LoadDecision {
                    mode: LoadMode::Full,
                    predicate: LoadPredicate::Unbounded,
                    replace_target: false,
                    warning: Some(format!(
                        "watermark for {}/{} is in the future ({} > {}); reading the full window",
                        job.name,
                        stage,
                        mark.to_rfc3339(),
                        now.to_rfc3339()
                    )),
                },
                Some(mark) => LoadDecision {
                    mode: LoadMode::Incremental,
                    predicate: LoadPredicate::After(mark),
                    replace_target: false,
                    warning: None,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{FileFormat, ScdType, SourceSpec};
    use chrono::{Duration, TimeZone};

    fn job(load_type: LoadType) -> JobDefinition {
        JobDefinition {
            name: "JOB_EMP".into(),
            source: SourceSpec::File {
                format: FileFormat::Csv,
                location: "data".into(),
            },
            target_schema: "processed".into(),
            target_table: "employee".into(),
            load_type,
            scd_type: ScdType::Type2,
            reject_threshold: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn test_watermark_advance_targets() {
        let day = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).single().unwrap_or_default();
        assert_eq!(
            WatermarkAdvance::newest([day(2), day(3), day(1)]),
            WatermarkAdvance::Marker(day(3))
        );
        assert_eq!(WatermarkAdvance::newest(Vec::new()), WatermarkAdvance::Hold);
        assert_eq!(WatermarkAdvance::Hold.target(now()), None);
        assert_eq!(WatermarkAdvance::RunStart.target(now()), Some(now()));
        assert_eq!(WatermarkAdvance::Marker(day(3)).target(now()), Some(day(3)));
    }

    #[test]
    fn test_full_ignores_watermark() {
        for mark in [None, Some(now() - Duration::days(1)), Some(now() + Duration::days(1))] {
            let decision = LoadModeResolver::resolve(&job(LoadType::Full), Layer::Raw, mark, now());
            assert_eq!(decision.mode, LoadMode::Full);
            assert_eq!(decision.predicate, LoadPredicate::Unbounded);
            assert!(decision.replace_target);
            assert!(decision.warning.is_none());
        }
    }

    #[test]
    fn test_full_never_truncates_processed() {
        let decision =
            LoadModeResolver::resolve(&job(LoadType::Full), Layer::Processed, None, now());
        assert!(!decision.replace_target);
    }

    #[test]
    fn test_incremental_first_run_is_implicit_full() {
        let decision =
            LoadModeResolver::resolve(&job(LoadType::Incremental), Layer::Curated, None, now());
        assert_eq!(decision.mode, LoadMode::Full);
        assert_eq!(decision.predicate, LoadPredicate::Unbounded);
        assert!(!decision.replace_target);
    }

    #[test]
    fn test_incremental_is_strictly_greater() {
        let mark = now() - Duration::hours(2);
        let decision = LoadModeResolver::resolve(
            &job(LoadType::Incremental),
            Layer::Curated,
            Some(mark),
            now(),
        );
        assert_eq!(decision.mode, LoadMode::Incremental);
        assert!(!decision.predicate.admits(mark));
        assert!(decision.predicate.admits(mark + Duration::microseconds(1)));
        assert_eq!(
            decision.predicate.sql_filter(LOADED_AT_COLUMN).as_deref(),
            Some("\"_loaded_at\" > TIMESTAMP '2024-06-01 10:00:00.000000'")
        );
    }

    #[test]
    fn test_future_watermark_warns_without_suppressing() {
        let decision = LoadModeResolver::resolve(
            &job(LoadType::Incremental),
            Layer::Raw,
            Some(now() + Duration::days(3)),
            now(),
        );
        assert_eq!(decision.predicate, LoadPredicate::Unbounded);
        assert!(decision.warning.is_some());
        assert!(!decision.replace_target);
    }
}
