// layerline-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use duckdb::types::{TimeUnit, Value as SqlValue, ValueRef};
use duckdb::{Config, Connection, params_from_iter};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::job::TableRef;
use crate::domain::value::Value;
use crate::error::EtlError;
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::connector::{ColumnSchema, Connector, QueryResult, Statement};

pub struct DuckDBConnector {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDBConnector {
    pub fn new(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, EtlError> {
        self.conn
            .lock()
            .map_err(|_| InfrastructureError::Database(DatabaseError::Poisoned).into())
    }
}

/// Domain value -> bound parameter. Dates, timestamps and decimals travel as
/// text and are cast by the statement (`CAST(? AS ...)`).
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::BigInt(*i),
        Value::Float(f) => SqlValue::Double(*f),
        Value::Bool(b) => SqlValue::Boolean(*b),
        Value::Text(s) => SqlValue::Text(s.clone()),
        other => other.render().map(SqlValue::Text).unwrap_or(SqlValue::Null),
    }
}

fn render(value: ValueRef<'_>) -> Option<String> {
    let text = match value {
        ValueRef::Null => return None,
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(i) => i.to_string(),
        ValueRef::SmallInt(i) => i.to_string(),
        ValueRef::Int(i) => i.to_string(),
        ValueRef::BigInt(i) => i.to_string(),
        ValueRef::HugeInt(i) => i.to_string(),
        ValueRef::UTinyInt(i) => i.to_string(),
        ValueRef::USmallInt(i) => i.to_string(),
        ValueRef::UInt(i) => i.to_string(),
        ValueRef::UBigInt(i) => i.to_string(),
        ValueRef::Float(f) => f.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(days))))
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("{:?}", value)),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v.saturating_mul(1_000_000),
                TimeUnit::Millisecond => v.saturating_mul(1_000),
                TimeUnit::Microsecond => v,
                TimeUnit::Nanosecond => v / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|ts| ts.naive_utc().to_string())
                .unwrap_or_else(|| format!("{:?}", value))
        }
        other => format!("{:?}", other),
    };
    Some(text)
}

#[async_trait]
impl Connector for DuckDBConnector {
    async fn execute(&self, query: &str) -> Result<(), EtlError> {
        let conn = self.lock()?;
        conn.execute_batch(query)?;
        Ok(())
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> Result<u64, EtlError> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction()?;
        let mut changed = 0u64;

        for statement in statements {
            if statement.params.is_empty() {
                changed += tx.execute(&statement.sql, [])? as u64;
                continue;
            }
            let mut prepared = tx.prepare(&statement.sql)?;
            for params in &statement.params {
                let bound = params.iter().map(to_sql).collect::<Vec<_>>();
                changed += prepared.execute(params_from_iter(bound))? as u64;
            }
        }

        tx.commit()?;
        Ok(changed)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, EtlError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let bound = params.iter().map(to_sql).collect::<Vec<_>>();
        let mut rows = stmt.query(params_from_iter(bound))?;
        let columns = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut result = QueryResult {
            columns,
            rows: Vec::new(),
        };
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(result.columns.len());
            for i in 0..result.columns.len() {
                cells.push(render(row.get_ref(i)?));
            }
            result.rows.push(cells);
        }
        Ok(result)
    }

    async fn fetch_columns(&self, table: &TableRef) -> Result<Vec<ColumnSchema>, EtlError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
        )?;

        let rows = stmt.query_map([table.schema.as_str(), table.table.as_str()], |row| {
            Ok(ColumnSchema {
                name: row.get(0)?,
                data_type: row.get(1)?,
                is_nullable: row.get::<_, String>(2)? == "YES",
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    async fn fetch_primary_key(&self, table: &TableRef) -> Result<Vec<String>, EtlError> {
        let result = self
            .query(
                "SELECT unnest(constraint_column_names) FROM duckdb_constraints() \
                 WHERE schema_name = ? AND table_name = ? AND constraint_type = 'PRIMARY KEY'",
                &[
                    Value::from(table.schema.as_str()),
                    Value::from(table.table.as_str()),
                ],
            )
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    fn engine_name(&self) -> &str {
        "duckdb"
    }
}
