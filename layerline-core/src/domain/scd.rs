// layerline-core/src/domain/scd.rs
//
// Slowly-Changing-Dimension merge planning. Pure: the engine reads the
// current Processed rows through an index and returns the writes to apply.
// It never sees the table itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::job::ScdType;
use crate::domain::mapping::MappingSet;
use crate::domain::reject::{RejectLog, RejectReason};
use crate::domain::value::{Record, Value};

pub const EFFECTIVE_START: &str = "effective_start";
pub const EFFECTIVE_END: &str = "effective_end";
pub const IS_CURRENT: &str = "is_current";

/// Natural identifier of an entity, in canonical text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BusinessKey(Vec<String>);

impl BusinessKey {
    /// `None` when any key part is null or blank.
    pub fn of(row: &Record, key_columns: &[String]) -> Option<Self> {
        let mut parts = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let value = row.get(column)?;
            if value.is_blank() {
                return None;
            }
            parts.push(value.render()?);
        }
        (!parts.is_empty()).then_some(Self(parts))
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

/// Which columns identify a row and which are compared/overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSpec {
    pub key_columns: Vec<String>,
    pub tracked_columns: Vec<String>,
}

impl MergeSpec {
    pub fn from_mappings(mappings: &MappingSet) -> Self {
        Self {
            key_columns: mappings.key_columns(),
            tracked_columns: mappings.tracked_columns(),
        }
    }

    pub fn has_key(&self) -> bool {
        !self.key_columns.is_empty()
    }

    fn key_values(&self, row: &Record) -> Record {
        project(row, &self.key_columns)
    }

    fn tracked_values(&self, row: &Record) -> Record {
        project(row, &self.tracked_columns)
    }

    fn attributes_differ(&self, incoming: &Record, current: &Record) -> bool {
        self.tracked_columns.iter().any(|column| {
            let new = incoming.get(column).unwrap_or(&Value::Null);
            let old = current.get(column).unwrap_or(&Value::Null);
            new != old
        })
    }
}

fn project(row: &Record, columns: &[String]) -> Record {
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Business key -> currently active row. Built once per merge and kept in
/// step with the plan, so a key is never looked up by scanning the table.
#[derive(Debug, Clone, Default)]
pub struct ActiveIndex {
    rows: HashMap<BusinessKey, Record>,
}

impl ActiveIndex {
    /// Indexes `rows`, skipping closed versions (`is_current = false`) when
    /// the rows carry history columns.
    pub fn build(rows: Vec<Record>, spec: &MergeSpec) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            if matches!(row.get(IS_CURRENT), Some(Value::Bool(false))) {
                continue;
            }
            if let Some(key) = BusinessKey::of(&row, &spec.key_columns) {
                index.insert(key, row);
            }
        }
        Self { rows: index }
    }

    pub fn get(&self, key: &BusinessKey) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A Type-1 overwrite of one row's tracked attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowUpdate {
    pub key: Record,
    pub values: Record,
}

/// The writes one merge produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergePlan {
    /// Full rows to insert (Type 2 rows carry their history columns).
    pub inserts: Vec<Record>,
    /// Type 1 in-place overwrites.
    pub updates: Vec<RowUpdate>,
    /// Type 2 versions to close, by key values.
    pub closes: Vec<Record>,
    pub unchanged: usize,
    pub rejects: RejectLog,
}

impl MergePlan {
    /// Rows the plan writes (inserted or overwritten).
    pub fn written(&self) -> u64 {
        (self.inserts.len() + self.updates.len()) as u64
    }

    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.closes.is_empty()
    }
}

enum Pending {
    Insert(usize),
    Update(usize),
}

pub struct ScdMergeEngine<'a> {
    spec: &'a MergeSpec,
}

impl<'a> ScdMergeEngine<'a> {
    pub fn new(spec: &'a MergeSpec) -> Self {
        Self { spec }
    }

    /// Collapses the batch to one row per business key, the last arrival
    /// winning. Rows without a usable key are rejected. Output keeps the
    /// order in which keys first appeared.
    pub fn dedupe(&self, batch: Vec<Record>) -> (Vec<Record>, RejectLog) {
        let mut rejects = RejectLog::default();
        let mut positions: HashMap<BusinessKey, usize> = HashMap::new();
        let mut rows: Vec<Record> = Vec::with_capacity(batch.len());

        for (i, row) in batch.into_iter().enumerate() {
            match BusinessKey::of(&row, &self.spec.key_columns) {
                Some(key) => match positions.get(&key) {
                    Some(&pos) => rows[pos] = row,
                    None => {
                        positions.insert(key, rows.len());
                        rows.push(row);
                    }
                },
                None => rejects.push(i, self.null_key()),
            }
        }
        (rows, rejects)
    }

    pub fn merge(
        &self,
        scd: ScdType,
        batch: Vec<Record>,
        index: &mut ActiveIndex,
        as_of: DateTime<Utc>,
    ) -> MergePlan {
        match scd {
            ScdType::Type2 => self.merge_type2(batch, index, as_of),
            ScdType::Type1 | ScdType::None => self.merge_type1(batch, index),
        }
    }

    /// Upsert keyed by business key; no history.
    pub fn merge_type1(&self, batch: Vec<Record>, index: &mut ActiveIndex) -> MergePlan {
        let mut plan = MergePlan::default();
        // Keys written earlier in this plan, by slot in `inserts` or `updates`.
        let mut pending: HashMap<BusinessKey, Pending> = HashMap::new();

        for (i, incoming) in batch.into_iter().enumerate() {
            let Some(key) = BusinessKey::of(&incoming, &self.spec.key_columns) else {
                plan.rejects.push(i, self.null_key());
                continue;
            };
            let mut row = self.spec.key_values(&incoming);
            row.extend(self.spec.tracked_values(&incoming));

            match index.rows.get(&key) {
                Some(current) if !self.spec.attributes_differ(&row, current) => {
                    plan.unchanged += 1;
                    continue;
                }
                Some(_) => match pending.get(&key) {
                    Some(Pending::Insert(slot)) => plan.inserts[*slot] = row.clone(),
                    Some(Pending::Update(slot)) => {
                        plan.updates[*slot].values = self.spec.tracked_values(&row)
                    }
                    None => {
                        pending.insert(key.clone(), Pending::Update(plan.updates.len()));
                        plan.updates.push(RowUpdate {
                            key: self.spec.key_values(&row),
                            values: self.spec.tracked_values(&row),
                        });
                    }
                },
                None => {
                    pending.insert(key.clone(), Pending::Insert(plan.inserts.len()));
                    plan.inserts.push(row.clone());
                }
            }
            index.rows.insert(key, row);
        }
        plan
    }

    /// Versioned history: close the active version and open a new one only
    /// when a tracked attribute changed. Keys absent from the batch are left
    /// alone; absence is not deletion.
    pub fn merge_type2(
        &self,
        batch: Vec<Record>,
        index: &mut ActiveIndex,
        as_of: DateTime<Utc>,
    ) -> MergePlan {
        let mut plan = MergePlan::default();
        let mut pending: HashMap<BusinessKey, usize> = HashMap::new();

        for (i, incoming) in batch.into_iter().enumerate() {
            let Some(key) = BusinessKey::of(&incoming, &self.spec.key_columns) else {
                plan.rejects.push(i, self.null_key());
                continue;
            };

            let mut version = self.spec.key_values(&incoming);
            version.extend(self.spec.tracked_values(&incoming));
            version.insert(EFFECTIVE_START.to_string(), Value::timestamp(as_of));
            version.insert(EFFECTIVE_END.to_string(), Value::Null);
            version.insert(IS_CURRENT.to_string(), Value::Bool(true));

            if let Some(current) = index.rows.get(&key) {
                if !self.spec.attributes_differ(&incoming, current) {
                    plan.unchanged += 1;
                    continue;
                }
                // A version opened earlier in this batch is not stored yet:
                // replace it instead of closing it.
                if let Some(&slot) = pending.get(&key) {
                    plan.inserts[slot] = version.clone();
                    index.rows.insert(key, version);
                    continue;
                }
                plan.closes.push(self.spec.key_values(&incoming));
            }

            pending.insert(key.clone(), plan.inserts.len());
            plan.inserts.push(version.clone());
            index.rows.insert(key, version);
        }
        plan
    }

    fn null_key(&self) -> RejectReason {
        RejectReason::NullBusinessKey {
            columns: self.spec.key_columns.clone(),
        }
    }
}
