// layerline-core/src/domain/reject.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::error::DomainError;
use crate::domain::job::Layer;
use crate::domain::load_mode::WatermarkAdvance;

/// How many rejected rows are quoted verbatim in an audit message.
const SAMPLE_SIZE: usize = 5;

/// Why a single row was excluded. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RejectReason {
    MissingColumn { column: String },
    NullViolation { column: String },
    CastFailure { column: String, value: String, target: String },
    LengthExceeded { column: String, length: usize, max: u32 },
    ForeignKeyViolation { column: String, value: String, reference: String },
    NullBusinessKey { columns: Vec<String> },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingColumn { .. } => "missing_column",
            RejectReason::NullViolation { .. } => "null_violation",
            RejectReason::CastFailure { .. } => "cast_failure",
            RejectReason::LengthExceeded { .. } => "length_exceeded",
            RejectReason::ForeignKeyViolation { .. } => "fk_violation",
            RejectReason::NullBusinessKey { .. } => "null_business_key",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingColumn { column } => {
                write!(f, "required column '{}' missing", column)
            }
            RejectReason::NullViolation { column } => write!(f, "'{}' is null", column),
            RejectReason::CastFailure {
                column,
                value,
                target,
            } => write!(f, "'{}' = '{}' is not a valid {}", column, value, target),
            RejectReason::LengthExceeded {
                column,
                length,
                max,
            } => write!(f, "'{}' has {} characters (max {})", column, length, max),
            RejectReason::ForeignKeyViolation {
                column,
                value,
                reference,
            } => write!(f, "'{}' = '{}' not found in {}", column, value, reference),
            RejectReason::NullBusinessKey { columns } => {
                write!(f, "business key ({}) is null or empty", columns.join(", "))
            }
        }
    }
}

/// A rejected row: its position in the stage input and the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reject {
    pub row: usize,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectLog {
    entries: Vec<Reject>,
}

impl RejectLog {
    pub fn push(&mut self, row: usize, reason: RejectReason) {
        self.entries.push(Reject { row, reason });
    }

    pub fn extend(&mut self, other: RejectLog) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Reject] {
        &self.entries
    }

    pub fn counts_by_rule(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.reason.code()).or_insert(0) += 1;
        }
        counts
    }

    /// One line for the audit message, e.g.
    /// `3 rejected (cast_failure=1, null_violation=2); row 4: 'Dept' is null`.
    pub fn summary(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let counts = self
            .counts_by_rule()
            .into_iter()
            .map(|(rule, n)| format!("{}={}", rule, n))
            .collect::<Vec<_>>()
            .join(", ");
        let samples = self
            .entries
            .iter()
            .take(SAMPLE_SIZE)
            .map(|r| format!("row {}: {}", r.row, r.reason))
            .collect::<Vec<_>>()
            .join("; ");
        Some(format!("{} rejected ({}); {}", self.entries.len(), counts, samples))
    }
}

/// What every transform engine reports back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub accepted: u64,
    pub rejects: RejectLog,
    /// Non-row remarks (skipped FK checks, empty files...).
    pub notes: Vec<String>,
    pub watermark: WatermarkAdvance,
}

impl StageOutcome {
    pub fn rejected(&self) -> u64 {
        self.rejects.len() as u64
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn message(&self) -> String {
        let mut parts = vec![format!("{} rows accepted", self.accepted)];
        if let Some(summary) = self.rejects.summary() {
            parts.push(summary);
        }
        parts.extend(self.notes.iter().cloned());
        parts.join(" | ")
    }
}

/// Escalation rule for row-level rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RejectPolicy {
    /// Maximum tolerated `rejected / total` ratio. `None` never escalates.
    pub threshold: Option<f64>,
}

impl RejectPolicy {
    pub fn check(&self, stage: Layer, outcome: &StageOutcome) -> Result<(), DomainError> {
        let Some(threshold) = self.threshold else {
            return Ok(());
        };
        let rejected = outcome.rejected();
        let total = outcome.accepted + rejected;
        if total == 0 {
            return Ok(());
        }
        let ratio = rejected as f64 / total as f64;
        if ratio > threshold {
            return Err(DomainError::RejectThresholdExceeded {
                stage: stage.to_string(),
                rejected,
                total,
                threshold,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(accepted: u64, rejected: usize) -> StageOutcome {
        let mut out = StageOutcome {
            accepted,
            ..Default::default()
        };
        for row in 0..rejected {
            out.rejects.push(
                row,
                RejectReason::NullViolation {
                    column: "Dept".into(),
                },
            );
        }
        out
    }

    #[test]
    fn test_summary_counts_and_samples() {
        let mut log = RejectLog::default();
        log.push(
            3,
            RejectReason::NullViolation {
                column: "Dept".into(),
            },
        );
        log.push(
            7,
            RejectReason::CastFailure {
                column: "EmployeeID".into(),
                value: "abc".into(),
                target: "INT".into(),
            },
        );
        let summary = log.summary().unwrap_or_default();
        assert!(summary.starts_with("2 rejected (cast_failure=1, null_violation=1)"));
        assert!(summary.contains("row 3: 'Dept' is null"));
    }

    #[test]
    fn test_default_policy_never_escalates() {
        let policy = RejectPolicy::default();
        assert!(policy.check(Layer::Curated, &outcome(0, 10)).is_ok());
    }

    #[test]
    fn test_threshold_escalates_above_ratio() {
        let policy = RejectPolicy {
            threshold: Some(0.25),
        };
        assert!(policy.check(Layer::Raw, &outcome(3, 1)).is_ok());
        let err = policy.check(Layer::Raw, &outcome(2, 2));
        assert!(matches!(
            err,
            Err(DomainError::RejectThresholdExceeded {
                rejected: 2,
                total: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_message_lists_notes() {
        let mut out = outcome(5, 0);
        out.note("FK check on 'DeptID' skipped");
        assert_eq!(out.message(), "5 rows accepted | FK check on 'DeptID' skipped");
    }
}
