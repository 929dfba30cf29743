// layerline-core/src/application/materialization.rs

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::domain::error::DomainError;
use crate::domain::job::{JobDefinition, Layer, LayerSchemas, ScdType, TableRef, quote_ident};
use crate::domain::load_mode::{LOADED_AT_COLUMN, SEQ_COLUMN};
use crate::domain::mapping::{ColumnContract, ColumnMapping, MappingSet};
use crate::domain::scd::{EFFECTIVE_END, EFFECTIVE_START, IS_CURRENT};
use crate::error::EtlError;
use crate::ports::connector::{ColumnSchema, Connector};

/// A column as one layer's table stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalColumn {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    /// Typed columns are checked through their mapping; the rest by name.
    mapping: Option<ColumnMapping>,
}

impl PhysicalColumn {
    fn technical(name: &str, sql_type: &str, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            nullable,
            mapping: None,
        }
    }

    fn accepts(&self, physical: &str) -> bool {
        match &self.mapping {
            Some(mapping) => mapping.is_compatible_with(physical),
            None => {
                let physical = physical.trim().to_ascii_uppercase();
                physical == self.sql_type || physical.starts_with(&format!("{}(", self.sql_type))
            }
        }
    }

    /// Declared length of a text column.
    fn length(&self) -> Option<u32> {
        self.mapping
            .as_ref()
            .filter(|m| m.data_type.is_varlen())
            .and_then(|m| m.length)
    }

    fn definition(&self) -> String {
        format!(
            "{} {}{}",
            quote_ident(&self.name),
            self.sql_type,
            if self.nullable { "" } else { " NOT NULL" }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub reference: TableRef,
}

/// The table a job needs in one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerTable {
    pub table: TableRef,
    pub columns: Vec<PhysicalColumn>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl LayerTable {
    pub fn plan(
        job: &JobDefinition,
        mappings: &MappingSet,
        layer: Layer,
        schemas: &LayerSchemas,
    ) -> Self {
        let table = job.table_for(layer, schemas);
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        let mut foreign_keys = Vec::new();

        match layer {
            Layer::Raw => {
                // Raw keeps source text untouched: no types, no constraints.
                for m in mappings.columns() {
                    columns.push(PhysicalColumn::technical(&m.target_column, "VARCHAR", true));
                }
            }
            Layer::Curated | Layer::Processed => {
                for m in mappings.columns() {
                    let d = m.describe();
                    columns.push(PhysicalColumn {
                        name: d.name,
                        sql_type: d.sql_type,
                        nullable: d.nullable,
                        mapping: Some(m.clone()),
                    });
                }
                let keyed = layer == Layer::Curated || job.scd_type != ScdType::Type2;
                if keyed {
                    primary_key = mappings.key_columns();
                }
                if layer == Layer::Curated {
                    foreign_keys = mappings
                        .foreign_keys()
                        .filter_map(|m| {
                            mappings.reference_of(m, &schemas.curated).map(|reference| ForeignKey {
                                column: m.target_column.clone(),
                                reference,
                            })
                        })
                        .collect();
                }
            }
        }

        match layer {
            Layer::Raw | Layer::Curated => {
                columns.push(PhysicalColumn::technical(LOADED_AT_COLUMN, "TIMESTAMP", false));
                columns.push(PhysicalColumn::technical(SEQ_COLUMN, "BIGINT", false));
            }
            Layer::Processed if job.scd_type == ScdType::Type2 => {
                columns.push(PhysicalColumn::technical(EFFECTIVE_START, "TIMESTAMP", false));
                columns.push(PhysicalColumn::technical(EFFECTIVE_END, "TIMESTAMP", true));
                columns.push(PhysicalColumn::technical(IS_CURRENT, "BOOLEAN", false));
            }
            Layer::Processed => {}
        }

        Self {
            table,
            columns,
            primary_key,
            foreign_keys,
        }
    }

    pub fn column(&self, name: &str) -> Option<&PhysicalColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Physical type for a statement cast; unknown columns travel as text.
    pub fn sql_type_of(&self, name: &str) -> &str {
        self.column(name).map(|c| c.sql_type.as_str()).unwrap_or("VARCHAR")
    }

    pub fn declared_lengths(&self) -> Vec<(String, u32)> {
        self.columns
            .iter()
            .filter_map(|c| c.length().map(|n| (c.name.clone(), n)))
            .collect()
    }

    fn keeps_history(&self) -> bool {
        self.column(IS_CURRENT).is_some()
    }

    pub fn create_sql(&self, foreign_keys: &[&ForeignKey]) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(PhysicalColumn::definition).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", join_idents(&self.primary_key)));
        }
        for fk in foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&fk.column),
                fk.reference.qualified(),
                quote_ident(&fk.column)
            ));
        }
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.table.qualified(),
            parts.join(",\n    ")
        )
    }
}

fn join_idents(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn recorded_length(recorded: &HashMap<String, u32>, column: &str) -> Option<u32> {
    recorded
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, n)| *n)
}

/// `VARCHAR(50)` -> 50, for stores that keep the declared length.
fn physical_length(physical: &str) -> Option<u32> {
    let physical = physical.trim().to_ascii_uppercase();
    physical
        .strip_prefix("VARCHAR(")?
        .strip_suffix(')')?
        .trim()
        .parse()
        .ok()
}

fn timestamp_literal(at: DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", at.format("%Y-%m-%d %H:%M:%S%.6f"))
}

/// What a materialization did to one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializeReport {
    pub created: bool,
    pub added: Vec<String>,
    pub relaxed: Vec<String>,
    /// Text columns whose declared length grew.
    pub widened: Vec<String>,
    /// Declared text lengths the table holds afterwards, by column name.
    pub lengths: Vec<(String, u32)>,
    /// Deltas that were reported but not applied.
    pub warnings: Vec<String>,
}

pub struct SchemaMaterializer;

impl SchemaMaterializer {
    /// Ensures the layer table exists with the mapped columns. Existing
    /// tables only ever gain columns, lose NOT NULL or widen text; a column
    /// that would need retyping or narrowing fails the job with a schema
    /// conflict.
    ///
    /// DuckDB does not keep `VARCHAR(n)` lengths, so the widest length each
    /// column was declared with comes from `recorded` and the new state is
    /// returned in [`MaterializeReport::lengths`] for the caller to store.
    /// Rows already in a table that starts keeping history become current
    /// versions from `run_start`.
    #[instrument(skip_all, fields(job = %job.name, layer = %layer))]
    pub async fn materialize(
        connector: &dyn Connector,
        job: &JobDefinition,
        mappings: &MappingSet,
        layer: Layer,
        schemas: &LayerSchemas,
        recorded: &HashMap<String, u32>,
        run_start: DateTime<Utc>,
    ) -> Result<MaterializeReport, EtlError> {
        if mappings.is_empty() {
            return Err(DomainError::Configuration(format!(
                "job '{}' has no column mappings",
                job.name
            ))
            .into());
        }

        let plan = LayerTable::plan(job, mappings, layer, schemas);
        let existing = connector.fetch_columns(&plan.table).await?;

        if existing.is_empty() {
            Self::create(connector, &plan).await
        } else {
            Self::alter(connector, &plan, &existing, recorded, run_start).await
        }
    }

    async fn create(
        connector: &dyn Connector,
        plan: &LayerTable,
    ) -> Result<MaterializeReport, EtlError> {
        let mut report = MaterializeReport {
            created: true,
            lengths: plan.declared_lengths(),
            ..Default::default()
        };

        let mut applied = Vec::new();
        for fk in &plan.foreign_keys {
            if fk.reference == plan.table {
                report
                    .warnings
                    .push(format!("self-referencing foreign key on '{}' not declared", fk.column));
                continue;
            }
            let referenced_key = connector.fetch_primary_key(&fk.reference).await?;
            if same_columns(&referenced_key, std::slice::from_ref(&fk.column)) {
                applied.push(fk);
            } else {
                report.warnings.push(format!(
                    "foreign key on '{}' not declared: {} has no primary key ({})",
                    fk.column, fk.reference, fk.column
                ));
            }
        }
        for warning in &report.warnings {
            warn!("{}: {}", plan.table, warning);
        }

        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n{};",
            quote_ident(&plan.table.schema),
            plan.create_sql(&applied)
        );
        connector.execute(&ddl).await.map_err(|e| {
            EtlError::InternalError(format!(
                "Creating {} failed.\n    DB Error: {}\n    Query: {}",
                plan.table, e, ddl
            ))
        })?;
        info!("Created {}", plan.table);
        Ok(report)
    }

    async fn alter(
        connector: &dyn Connector,
        plan: &LayerTable,
        existing: &[ColumnSchema],
        recorded: &HashMap<String, u32>,
        run_start: DateTime<Utc>,
    ) -> Result<MaterializeReport, EtlError> {
        let mut report = MaterializeReport::default();
        let mut conflicts = Vec::new();
        let mut ddl = Vec::new();
        let table = plan.table.qualified();
        let actual_key = connector.fetch_primary_key(&plan.table).await?;

        let starts_history = plan.keeps_history()
            && !existing.iter().any(|c| c.name.eq_ignore_ascii_case(IS_CURRENT));
        if starts_history && !actual_key.is_empty() {
            conflicts.push(format!(
                "primary key ({}) leaves no room for history versions; rebuild the table to switch to type2",
                actual_key.join(", ")
            ));
        }

        for column in &plan.columns {
            let Some(current) = existing
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&column.name))
            else {
                if !column.nullable {
                    report.warnings.push(format!(
                        "column '{}' added as nullable: existing rows cannot satisfy NOT NULL",
                        column.name
                    ));
                }
                ddl.push(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table,
                    quote_ident(&column.name),
                    column.sql_type
                ));
                report.added.push(column.name.clone());
                continue;
            };

            if !column.accepts(&current.data_type) {
                conflicts.push(format!(
                    "'{}' is {} but the mapping requires {}",
                    current.name, current.data_type, column.sql_type
                ));
                continue;
            }
            if let Some(length) = column.length() {
                let held = recorded_length(recorded, &current.name)
                    .into_iter()
                    .chain(physical_length(&current.data_type))
                    .max();
                match held {
                    Some(held) if length < held => {
                        conflicts.push(format!(
                            "'{}' holds up to {} characters but the mapping allows {}",
                            current.name, held, length
                        ));
                        continue;
                    }
                    Some(held) if length > held => report.widened.push(current.name.clone()),
                    _ => {}
                }
            }
            if column.nullable && !current.is_nullable {
                ddl.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                    table,
                    quote_ident(&current.name)
                ));
                report.relaxed.push(current.name.clone());
            } else if !column.nullable && current.is_nullable {
                report
                    .warnings
                    .push(format!("'{}' stays nullable; NOT NULL is not applied to existing tables", current.name));
            }
        }

        if !conflicts.is_empty() {
            return Err(DomainError::SchemaConflict {
                table: plan.table.to_string(),
                conflicts,
            }
            .into());
        }

        if starts_history {
            ddl.push(format!(
                "UPDATE {} SET {} = {}, {} = TRUE WHERE {} IS NULL",
                table,
                quote_ident(EFFECTIVE_START),
                timestamp_literal(run_start),
                quote_ident(IS_CURRENT),
                quote_ident(IS_CURRENT)
            ));
            report.warnings.push(format!(
                "existing rows kept as current versions starting {}",
                run_start.format("%Y-%m-%d %H:%M:%S")
            ));
        }

        // Unmapped columns keep their recorded lengths.
        let mut lengths: Vec<(String, u32)> = recorded
            .iter()
            .filter(|(name, _)| plan.column(name).is_none())
            .map(|(name, n)| (name.clone(), *n))
            .collect();
        lengths.extend(plan.declared_lengths());
        lengths.sort();
        report.lengths = lengths;

        for current in existing {
            if plan.column(&current.name).is_none() {
                report
                    .warnings
                    .push(format!("'{}' is not mapped and is left untouched", current.name));
            }
        }

        if !same_columns(&actual_key, &plan.primary_key) {
            report.warnings.push(format!(
                "primary key is ({}) but the mapping flags ({}); constraints are not altered",
                actual_key.join(", "),
                plan.primary_key.join(", ")
            ));
        }

        for warning in &report.warnings {
            warn!("{}: {}", plan.table, warning);
        }
        if !ddl.is_empty() {
            let sql = ddl.join(";\n");
            connector.execute(&sql).await?;
            info!(
                added = report.added.len(),
                relaxed = report.relaxed.len(),
                widened = report.widened.len(),
                "Altered {}",
                plan.table
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::job::{FileFormat, LoadType, SourceSpec};
    use crate::domain::mapping::DataType;
    use crate::domain::value::Value;
    use crate::ports::connector::{QueryResult, Statement};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    // --- MOCK CONNECTOR ---
    #[derive(Clone, Default)]
    struct MockConnector {
        executed_queries: Arc<Mutex<Vec<String>>>,
        tables: HashMap<String, Vec<ColumnSchema>>,
        keys: HashMap<String, Vec<String>>,
    }

    impl MockConnector {
        fn with_table(mut self, table: &str, columns: &[(&str, &str, bool)], key: &[&str]) -> Self {
            self.tables.insert(
                table.to_string(),
                columns
                    .iter()
                    .map(|(name, data_type, is_nullable)| ColumnSchema {
                        name: name.to_string(),
                        data_type: data_type.to_string(),
                        is_nullable: *is_nullable,
                    })
                    .collect(),
            );
            self.keys
                .insert(table.to_string(), key.iter().map(|k| k.to_string()).collect());
            self
        }

        fn queries(&self) -> Vec<String> {
            self.executed_queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn execute(&self, query: &str) -> Result<(), EtlError> {
            self.executed_queries.lock().unwrap().push(query.to_string());
            Ok(())
        }
        async fn execute_transaction(&self, _statements: &[Statement]) -> Result<u64, EtlError> {
            Ok(0)
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult, EtlError> {
            Ok(QueryResult::default())
        }
        async fn fetch_columns(&self, table: &TableRef) -> Result<Vec<ColumnSchema>, EtlError> {
            Ok(self.tables.get(&table.to_string()).cloned().unwrap_or_default())
        }
        async fn fetch_primary_key(&self, table: &TableRef) -> Result<Vec<String>, EtlError> {
            Ok(self.keys.get(&table.to_string()).cloned().unwrap_or_default())
        }
        fn engine_name(&self) -> &str {
            "mock"
        }
    }

    fn column(target: &str, data_type: DataType) -> ColumnMapping {
        ColumnMapping {
            job_name: "JOB_EMP".into(),
            source_column: target.to_lowercase(),
            target_column: target.into(),
            data_type,
            length: data_type.is_varlen().then_some(20),
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
        MappingSet::new(vec![id, column("Status", DataType::Varchar), dept])
    }

    fn job(scd_type: ScdType) -> JobDefinition {
        JobDefinition {
            name: "JOB_EMP".into(),
            source: SourceSpec::File {
                format: FileFormat::Csv,
                location: "data".into(),
            },
            target_schema: "processed".into(),
            target_table: "employee".into(),
            load_type: LoadType::Full,
            scd_type,
            reject_threshold: None,
        }
    }

    fn run_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().unwrap()
    }

    async fn run_recorded(
        connector: &MockConnector,
        scd: ScdType,
        layer: Layer,
        recorded: &[(&str, u32)],
    ) -> Result<MaterializeReport, EtlError> {
        let recorded: HashMap<String, u32> =
            recorded.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        SchemaMaterializer::materialize(
            connector,
            &job(scd),
            &mappings(),
            layer,
            &LayerSchemas::default(),
            &recorded,
            run_start(),
        )
        .await
    }

    async fn run(
        connector: &MockConnector,
        scd: ScdType,
        layer: Layer,
    ) -> Result<MaterializeReport, EtlError> {
        run_recorded(connector, scd, layer, &[]).await
    }

    #[tokio::test]
    async fn test_raw_table_is_all_text() {
        let connector = MockConnector::default();
        let report = run(&connector, ScdType::Type2, Layer::Raw).await.unwrap();
        assert!(report.created);

        let queries = connector.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0],
            "CREATE SCHEMA IF NOT EXISTS \"raw\";\nCREATE TABLE \"raw\".\"employee\" (\n    \
             \"EmployeeID\" VARCHAR,\n    \"Status\" VARCHAR,\n    \"DeptID\" VARCHAR,\n    \
             \"_loaded_at\" TIMESTAMP NOT NULL,\n    \"_seq\" BIGINT NOT NULL\n);"
        );
    }

    #[tokio::test]
    async fn test_curated_declares_key_and_existing_reference() {
        let connector = MockConnector::default().with_table(
            "curated.department",
            &[("DeptID", "INTEGER", false)],
            &["DeptID"],
        );
        run(&connector, ScdType::Type2, Layer::Curated).await.unwrap();

        let ddl = &connector.queries()[0];
        assert!(ddl.contains("\"EmployeeID\" INTEGER NOT NULL"));
        assert!(ddl.contains("PRIMARY KEY (\"EmployeeID\")"));
        assert!(ddl.contains(
            "FOREIGN KEY (\"DeptID\") REFERENCES \"curated\".\"department\" (\"DeptID\")"
        ));
    }

    #[tokio::test]
    async fn test_curated_skips_missing_reference() {
        let connector = MockConnector::default();
        let report = run(&connector, ScdType::Type1, Layer::Curated).await.unwrap();
        assert!(!connector.queries()[0].contains("FOREIGN KEY"));
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_processed_type2_has_history_and_no_key() {
        let connector = MockConnector::default();
        run(&connector, ScdType::Type2, Layer::Processed).await.unwrap();

        let ddl = &connector.queries()[0];
        assert!(!ddl.contains("PRIMARY KEY"));
        assert!(!ddl.contains("FOREIGN KEY"));
        assert!(ddl.contains("\"effective_start\" TIMESTAMP NOT NULL"));
        assert!(ddl.contains("\"effective_end\" TIMESTAMP,"));
        assert!(ddl.contains("\"is_current\" BOOLEAN NOT NULL"));
    }

    #[tokio::test]
    async fn test_processed_type1_is_keyed() {
        let connector = MockConnector::default();
        run(&connector, ScdType::Type1, Layer::Processed).await.unwrap();
        assert!(connector.queries()[0].contains("PRIMARY KEY (\"EmployeeID\")"));
    }

    #[tokio::test]
    async fn test_existing_table_gains_columns_and_relaxes_not_null() {
        let connector = MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "INTEGER", false),
                ("Status", "VARCHAR", false),
                ("Legacy", "VARCHAR", true),
            ],
            &["EmployeeID"],
        );
        let report = run(&connector, ScdType::Type1, Layer::Processed).await.unwrap();

        assert!(!report.created);
        assert_eq!(report.added, vec!["DeptID"]);
        assert_eq!(report.relaxed, vec!["Status"]);
        assert!(report.warnings.iter().any(|w| w.contains("Legacy")));
        assert_eq!(
            connector.queries(),
            vec![
                "ALTER TABLE \"processed\".\"employee\" ALTER COLUMN \"Status\" DROP NOT NULL;\n\
                 ALTER TABLE \"processed\".\"employee\" ADD COLUMN \"DeptID\" INTEGER"
            ]
        );
    }

    #[tokio::test]
    async fn test_incompatible_type_is_a_conflict() {
        let connector = MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "VARCHAR", false),
                ("Status", "INTEGER", true),
                ("DeptID", "INTEGER", true),
            ],
            &["EmployeeID"],
        );
        let err = run(&connector, ScdType::Type1, Layer::Processed).await.unwrap_err();
        match err {
            EtlError::Domain(DomainError::SchemaConflict { conflicts, .. }) => {
                assert_eq!(conflicts.len(), 2)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(connector.queries().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mappings_rejected_before_ddl() {
        let connector = MockConnector::default();
        let result = SchemaMaterializer::materialize(
            &connector,
            &job(ScdType::None),
            &MappingSet::default(),
            Layer::Raw,
            &LayerSchemas::default(),
            &HashMap::new(),
            run_start(),
        )
        .await;
        assert!(matches!(result, Err(EtlError::Domain(DomainError::Configuration(_)))));
        assert!(connector.queries().is_empty());
    }

    fn employee_table() -> MockConnector {
        MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "INTEGER", false),
                ("Status", "VARCHAR", true),
                ("DeptID", "INTEGER", true),
            ],
            &["EmployeeID"],
        )
    }

    #[tokio::test]
    async fn test_new_table_reports_text_lengths() {
        let connector = MockConnector::default();
        let report = run(&connector, ScdType::Type1, Layer::Processed).await.unwrap();
        assert!(connector.queries()[0].contains("\"Status\" VARCHAR(20)"));
        assert_eq!(report.lengths, vec![("Status".to_string(), 20)]);

        let raw = run(&MockConnector::default(), ScdType::Type1, Layer::Raw).await.unwrap();
        assert!(raw.lengths.is_empty());
    }

    #[tokio::test]
    async fn test_narrower_length_is_a_conflict() {
        let connector = employee_table();
        let err = run_recorded(&connector, ScdType::Type1, Layer::Processed, &[("status", 50)])
            .await
            .unwrap_err();
        match err {
            EtlError::Domain(DomainError::SchemaConflict { conflicts, .. }) => {
                assert_eq!(conflicts.len(), 1);
                assert!(conflicts[0].contains("holds up to 50 characters"));
                assert!(conflicts[0].contains("allows 20"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(connector.queries().is_empty());
    }

    #[tokio::test]
    async fn test_declared_physical_length_counts() {
        let connector = MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "INTEGER", false),
                ("Status", "VARCHAR(30)", true),
                ("DeptID", "INTEGER", true),
            ],
            &["EmployeeID"],
        );
        let result = run(&connector, ScdType::Type1, Layer::Processed).await;
        assert!(matches!(
            result,
            Err(EtlError::Domain(DomainError::SchemaConflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_wider_length_is_recorded() {
        let connector = employee_table();
        let report = run_recorded(
            &connector,
            ScdType::Type1,
            Layer::Processed,
            &[("Status", 10), ("Legacy", 5)],
        )
        .await
        .unwrap();
        assert_eq!(report.widened, vec!["Status"]);
        assert_eq!(
            report.lengths,
            vec![("Legacy".to_string(), 5), ("Status".to_string(), 20)]
        );
        assert!(connector.queries().is_empty());

        // A table with no record yet starts from the mapping's length.
        let report = run(&employee_table(), ScdType::Type1, Layer::Processed).await.unwrap();
        assert!(report.widened.is_empty());
        assert_eq!(report.lengths, vec![("Status".to_string(), 20)]);
    }

    #[tokio::test]
    async fn test_switch_to_type2_backfills_current_versions() {
        let connector = MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "INTEGER", false),
                ("Status", "VARCHAR", true),
                ("DeptID", "INTEGER", true),
            ],
            &[],
        );
        let report = run(&connector, ScdType::Type2, Layer::Processed).await.unwrap();

        assert_eq!(report.added, vec!["effective_start", "effective_end", "is_current"]);
        let queries = connector.queries();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].ends_with(
            "UPDATE \"processed\".\"employee\" SET \"effective_start\" = \
             TIMESTAMP '2024-03-01 09:00:00.000000', \"is_current\" = TRUE \
             WHERE \"is_current\" IS NULL"
        ));
        assert!(report.warnings.iter().any(|w| w.contains("current versions")));
    }

    #[tokio::test]
    async fn test_switch_to_type2_on_keyed_table_is_a_conflict() {
        let connector = employee_table();
        let err = run(&connector, ScdType::Type2, Layer::Processed).await.unwrap_err();
        match err {
            EtlError::Domain(DomainError::SchemaConflict { conflicts, .. }) => {
                assert!(conflicts[0].contains("history versions"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(connector.queries().is_empty());

        // A table that already keeps history is left as is.
        let connector = MockConnector::default().with_table(
            "processed.employee",
            &[
                ("EmployeeID", "INTEGER", false),
                ("Status", "VARCHAR", true),
                ("DeptID", "INTEGER", true),
                ("effective_start", "TIMESTAMP", false),
                ("effective_end", "TIMESTAMP", true),
                ("is_current", "BOOLEAN", false),
            ],
            &[],
        );
        let report = run(&connector, ScdType::Type2, Layer::Processed).await.unwrap();
        assert!(report.added.is_empty());
        assert!(connector.queries().is_empty());
    }

    #[tokio::test]
    async fn test_type2_backfill_on_duckdb() -> anyhow::Result<()> {
        use crate::infrastructure::adapters::duckdb::DuckDBConnector;

        let connector = DuckDBConnector::new(":memory:")?;
        connector
            .execute(
                "CREATE SCHEMA processed; \
                 CREATE TABLE processed.employee (\"EmployeeID\" INTEGER NOT NULL, \
                 \"Status\" VARCHAR, \"DeptID\" INTEGER); \
                 INSERT INTO processed.employee VALUES (101, 'Active', 10), (102, 'Active', 20);",
            )
            .await?;

        SchemaMaterializer::materialize(
            &connector,
            &job(ScdType::Type2),
            &mappings(),
            Layer::Processed,
            &LayerSchemas::default(),
            &HashMap::new(),
            run_start(),
        )
        .await?;

        let current = connector
            .query(
                "SELECT count(*) FROM processed.employee \
                 WHERE is_current AND effective_start = TIMESTAMP '2024-03-01 09:00:00' \
                 AND effective_end IS NULL",
                &[],
            )
            .await?;
        assert_eq!(current.scalar(), Some("2"));
        Ok(())
    }
}
