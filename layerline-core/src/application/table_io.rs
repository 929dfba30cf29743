// layerline-core/src/application/table_io.rs
//
// Reading layer tables into records and turning records or merge plans into
// parameterised statements. Every bound value is cast by the statement to
// the column's physical type.

use chrono::{DateTime, Utc};

use crate::application::materialization::LayerTable;
use crate::domain::job::{TableRef, quote_ident};
use crate::domain::load_mode::{LOADED_AT_COLUMN, SEQ_COLUMN};
use crate::domain::mapping::{ColumnContract, MappingSet};
use crate::domain::reject::RejectLog;
use crate::domain::scd::{EFFECTIVE_END, IS_CURRENT, MergePlan};
use crate::domain::value::{Record, Value};
use crate::error::EtlError;
use crate::ports::connector::{Connector, QueryResult, Statement};

/// Text cells -> records, SQL NULL -> `Value::Null`.
pub fn records(result: QueryResult) -> Vec<Record> {
    let QueryResult { columns, rows } = result;
    rows.into_iter()
        .map(|cells| {
            columns
                .iter()
                .cloned()
                .zip(cells.into_iter().map(|c| c.map(Value::Text).unwrap_or_default()))
                .collect()
        })
        .collect()
}

/// Reads `table`, optionally filtered, in the given column order.
pub async fn read_rows(
    connector: &dyn Connector,
    table: &TableRef,
    filter: Option<String>,
    order_by: &[&str],
) -> Result<Vec<Record>, EtlError> {
    let mut sql = format!("SELECT * FROM {}", table.qualified());
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(&filter);
    }
    if !order_by.is_empty() {
        let order = order_by
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    Ok(records(connector.query(&sql, &[]).await?))
}

/// Re-types text rows read from a typed layer. Rows that no longer cast are
/// rejected, identified by their position.
pub fn typed_rows(rows: Vec<Record>, mappings: &MappingSet) -> (Vec<Record>, RejectLog) {
    let mut rejects = RejectLog::default();
    let mut typed = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        match mappings.cast_record(&row) {
            Ok(record) => typed.push(record),
            Err(reason) => rejects.push(i, reason),
        }
    }
    (typed, rejects)
}

/// Current rows of a typed table, cast through the mappings so they compare
/// equal to freshly cast batch rows. Technical columns are dropped.
pub async fn current_rows(
    connector: &dyn Connector,
    table: &TableRef,
    mappings: &MappingSet,
    only_current: bool,
) -> Result<Vec<Record>, EtlError> {
    let filter = only_current.then(|| quote_ident(IS_CURRENT));
    let rows = read_rows(connector, table, filter, &[]).await?;
    let mut typed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Record::new();
        for column in mappings.columns() {
            let raw = row.get(&column.target_column).unwrap_or(&Value::Null);
            // Stored values were cast once already; keep them as-is if the
            // mapping changed since.
            let value = column.cast(raw).unwrap_or_else(|_| raw.clone());
            record.insert(column.target_column.clone(), value);
        }
        typed.push(record);
    }
    Ok(typed)
}

pub fn truncate(table: &LayerTable) -> Statement {
    Statement::plain(format!("DELETE FROM {}", table.table.qualified()))
}

fn placeholder(table: &LayerTable, column: &str) -> String {
    format!("CAST(? AS {})", table.sql_type_of(column))
}

/// One prepared INSERT over `columns`, one parameter set per row. Columns
/// a row lacks bind as NULL.
pub fn insert(table: &LayerTable, columns: &[String], rows: &[Record]) -> Option<Statement> {
    if rows.is_empty() || columns.is_empty() {
        return None;
    }
    let names = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = columns
        .iter()
        .map(|c| placeholder(table, c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.table.qualified(),
        names,
        values
    );
    let params = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    Some(Statement::batch(sql, params))
}

/// Adds `_loaded_at` and `_seq` to rows bound for Raw or Curated. `_seq`
/// restarts at zero for every load.
pub fn stamp(rows: &mut [Record], loaded_at: DateTime<Utc>) {
    for (seq, row) in rows.iter_mut().enumerate() {
        row.insert(LOADED_AT_COLUMN.to_string(), Value::timestamp(loaded_at));
        row.insert(SEQ_COLUMN.to_string(), Value::Int(seq as i64));
    }
}

/// Column list for inserts: every physical column of the table.
pub fn insert_columns(table: &LayerTable) -> Vec<String> {
    table.columns.iter().map(|c| c.name.clone()).collect()
}

fn key_predicate(table: &LayerTable, key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|c| format!("{} = {}", quote_ident(c), placeholder(table, c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Statements applying a merge plan: closes first, then overwrites, then
/// inserts. With `loaded_at`, written rows are stamped as a fresh load.
pub fn plan_statements(
    table: &LayerTable,
    plan: &MergePlan,
    key_columns: &[String],
    as_of: DateTime<Utc>,
    loaded_at: Option<DateTime<Utc>>,
) -> Vec<Statement> {
    let mut statements = Vec::new();

    if !plan.closes.is_empty() {
        let sql = format!(
            "UPDATE {} SET {} = CAST(? AS TIMESTAMP), {} = false WHERE {} AND {}",
            table.table.qualified(),
            quote_ident(EFFECTIVE_END),
            quote_ident(IS_CURRENT),
            key_predicate(table, key_columns),
            quote_ident(IS_CURRENT)
        );
        let params = plan
            .closes
            .iter()
            .map(|key| {
                let mut row = vec![Value::timestamp(as_of)];
                row.extend(key_columns.iter().map(|c| key.get(c).cloned().unwrap_or_default()));
                row
            })
            .collect();
        statements.push(Statement::batch(sql, params));
    }

    // Updates in one plan may touch different column sets; group per set.
    let mut groups: Vec<(Vec<String>, Vec<Vec<Value>>)> = Vec::new();
    for update in &plan.updates {
        let mut set_columns: Vec<String> = update.values.keys().cloned().collect();
        let mut params: Vec<Value> = update.values.values().cloned().collect();
        if let Some(at) = loaded_at {
            set_columns.push(LOADED_AT_COLUMN.to_string());
            params.push(Value::timestamp(at));
        }
        params.extend(key_columns.iter().map(|c| update.key.get(c).cloned().unwrap_or_default()));
        match groups.iter_mut().find(|(cols, _)| *cols == set_columns) {
            Some((_, rows)) => rows.push(params),
            None => groups.push((set_columns, vec![params])),
        }
    }
    for (set_columns, rows) in groups {
        if set_columns.is_empty() {
            continue;
        }
        let assignments = set_columns
            .iter()
            .map(|c| format!("{} = {}", quote_ident(c), placeholder(table, c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table.table.qualified(),
            assignments,
            key_predicate(table, key_columns)
        );
        statements.push(Statement::batch(sql, rows));
    }

    let mut inserts = plan.inserts.clone();
    if let Some(at) = loaded_at {
        stamp(&mut inserts, at);
    }
    if let Some(statement) = insert(table, &insert_columns(table), &inserts) {
        statements.push(statement);
    }
    statements
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::job::{
        FileFormat, JobDefinition, Layer, LayerSchemas, LoadType, ScdType, SourceSpec,
    };
    use crate::domain::mapping::{ColumnMapping, DataType};
    use crate::domain::scd::RowUpdate;
    use crate::domain::value::record;
    use chrono::TimeZone;

    fn mappings() -> MappingSet {
        let column = |target: &str, data_type: DataType, pk: bool| ColumnMapping {
            job_name: "JOB_EMP".into(),
            source_column: target.into(),
            target_column: target.into(),
            data_type,
            length: data_type.is_varlen().then_some(10),
            precision: None,
            scale: None,
            nullable: !pk,
            primary_key: pk,
            foreign_key: false,
            reference_table: None,
        };
        MappingSet::new(vec![
            column("EmployeeID", DataType::Int, true),
            column("Status", DataType::Varchar, false),
        ])
    }

    fn table(layer: Layer, scd_type: ScdType) -> LayerTable {
        let job = JobDefinition {
            name: "JOB_EMP".into(),
            source: SourceSpec::File {
                format: FileFormat::Csv,
                location: "data".into(),
            },
            target_schema: "processed".into(),
            target_table: "employee".into(),
            load_type: LoadType::Incremental,
            scd_type,
            reject_threshold: None,
        };
        LayerTable::plan(&job, &mappings(), layer, &LayerSchemas::default())
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().unwrap()
    }

    #[test]
    fn test_insert_casts_every_column() {
        let table = table(Layer::Processed, ScdType::Type1);
        let rows = vec![record([("EmployeeID", Value::Int(101)), ("Status", "Active".into())])];
        let stmt = insert(&table, &insert_columns(&table), &rows).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"processed\".\"employee\" (\"EmployeeID\", \"Status\") \
             VALUES (CAST(? AS INTEGER), CAST(? AS VARCHAR(10)))"
        );
        assert_eq!(stmt.params, vec![vec![Value::Int(101), Value::from("Active")]]);
        assert!(insert(&table, &insert_columns(&table), &[]).is_none());
    }

    #[test]
    fn test_stamp_numbers_rows_from_zero() {
        let mut rows = vec![Record::new(), Record::new()];
        stamp(&mut rows, at());
        assert_eq!(rows[1][SEQ_COLUMN], Value::Int(1));
        assert_eq!(rows[0][LOADED_AT_COLUMN], Value::timestamp(at()));
    }

    #[test]
    fn test_type2_plan_closes_before_inserting() {
        let table = table(Layer::Processed, ScdType::Type2);
        let key = vec!["EmployeeID".to_string()];
        let mut version = record([("EmployeeID", Value::Int(101)), ("Status", "OnLeave".into())]);
        version.insert("effective_start".into(), Value::timestamp(at()));
        version.insert("effective_end".into(), Value::Null);
        version.insert("is_current".into(), Value::Bool(true));
        let plan = MergePlan {
            inserts: vec![version],
            closes: vec![record([("EmployeeID", Value::Int(101))])],
            ..Default::default()
        };

        let statements = plan_statements(&table, &plan, &key, at(), None);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            "UPDATE \"processed\".\"employee\" SET \"effective_end\" = CAST(? AS TIMESTAMP), \
             \"is_current\" = false WHERE \"EmployeeID\" = CAST(? AS INTEGER) AND \"is_current\""
        );
        assert_eq!(statements[0].params[0], vec![Value::timestamp(at()), Value::Int(101)]);
        assert!(statements[1].sql.starts_with("INSERT INTO"));
        assert!(statements[1].sql.contains("\"is_current\""));
    }

    #[test]
    fn test_type1_plan_restamps_curated_rows() {
        let table = table(Layer::Curated, ScdType::Type1);
        let key = vec!["EmployeeID".to_string()];
        let plan = MergePlan {
            updates: vec![RowUpdate {
                key: record([("EmployeeID", Value::Int(101))]),
                values: record([("Status", "OnLeave")]),
            }],
            inserts: vec![record([("EmployeeID", Value::Int(102)), ("Status", "Active".into())])],
            ..Default::default()
        };

        let statements = plan_statements(&table, &plan, &key, at(), Some(at()));
        assert_eq!(
            statements[0].sql,
            "UPDATE \"curated\".\"employee\" SET \"Status\" = CAST(? AS VARCHAR(10)), \
             \"_loaded_at\" = CAST(? AS TIMESTAMP) WHERE \"EmployeeID\" = CAST(? AS INTEGER)"
        );
        assert_eq!(
            statements[0].params[0],
            vec![Value::from("OnLeave"), Value::timestamp(at()), Value::Int(101)]
        );
        let insert = &statements[1];
        assert!(insert.sql.contains("\"_seq\""));
        assert_eq!(insert.params[0].len(), 4);
    }

    #[test]
    fn test_records_maps_nulls() {
        let rows = records(QueryResult {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Some("1".into()), None]],
        });
        assert_eq!(rows[0]["a"], Value::from("1"));
        assert!(rows[0]["b"].is_null());
    }
}
