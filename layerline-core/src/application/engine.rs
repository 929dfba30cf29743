// layerline-core/src/application/engine.rs

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::domain::job::TableRef;
use crate::error::EtlError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::{ColumnSchema, Connector, QueryResult};

/// Runs an ad-hoc query with timing logs.
#[instrument(skip(connector), fields(query.len = query.len()))]
pub async fn execute_query(
    connector: &dyn Connector,
    query: &str,
) -> Result<QueryResult, EtlError> {
    let start = Instant::now();
    debug!("Executing query: {}", query);

    let result = connector.query(query, &[]).await;
    let duration = start.elapsed();

    match result {
        Ok(rows) => {
            debug!(rows = rows.rows.len(), "Query finished in {:.2?}", duration);
            Ok(rows)
        }
        Err(e) => {
            error!("Query failed after {:.2?}: {}", duration, e);
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInspection {
    pub table: String,
    pub columns: Vec<(String, String, bool)>,
    pub primary_key: Vec<String>,
    pub row_count: u64,
    #[serde(skip)]
    pub sample: QueryResult,
}

/// Columns, key, size and the first `limit` rows of a table.
#[instrument(skip(connector))]
pub async fn inspect_table(
    connector: &dyn Connector,
    table: &TableRef,
    limit: usize,
) -> Result<TableInspection, EtlError> {
    let columns: Vec<ColumnSchema> = connector.fetch_columns(table).await?;
    if columns.is_empty() {
        return Err(
            InfrastructureError::SourceError(format!("table {} does not exist", table)).into(),
        );
    }
    let primary_key = connector.fetch_primary_key(table).await?;

    let count = connector
        .query(&format!("SELECT count(*) FROM {}", table.qualified()), &[])
        .await?;
    let row_count = count
        .scalar()
        .and_then(|c| c.parse::<u64>().ok())
        .unwrap_or_default();

    let sample = connector
        .query(
            &format!("SELECT * FROM {} LIMIT {}", table.qualified(), limit),
            &[],
        )
        .await?;

    Ok(TableInspection {
        table: table.to_string(),
        columns: columns
            .into_iter()
            .map(|c| (c.name, c.data_type, c.is_nullable))
            .collect(),
        primary_key,
        row_count,
        sample,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::duckdb::DuckDBConnector;
    use anyhow::Result;

    #[tokio::test]
    async fn test_query_and_inspect() -> Result<()> {
        let connector = DuckDBConnector::new(":memory:")?;
        connector
            .execute(
                "CREATE SCHEMA processed; \
                 CREATE TABLE processed.department (DeptID INTEGER PRIMARY KEY, Name VARCHAR); \
                 INSERT INTO processed.department VALUES (10, 'Eng'), (20, 'Ops');",
            )
            .await?;

        let result =
            execute_query(&connector, "SELECT Name FROM processed.department ORDER BY DeptID")
                .await?;
        assert_eq!(result.columns, vec!["Name"]);
        assert_eq!(result.rows.len(), 2);

        let inspection =
            inspect_table(&connector, &TableRef::new("processed", "department"), 1).await?;
        assert_eq!(inspection.row_count, 2);
        assert_eq!(inspection.primary_key, vec!["DeptID"]);
        assert_eq!(inspection.sample.rows.len(), 1);
        assert_eq!(inspection.columns[0].0, "DeptID");
        assert_eq!(inspection.columns[0].1, "INTEGER");
        Ok(())
    }

    #[tokio::test]
    async fn test_inspect_missing_table() {
        let connector = DuckDBConnector::new(":memory:").unwrap();
        let result = inspect_table(&connector, &TableRef::new("main", "nope"), 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_error_propagates() {
        let connector = DuckDBConnector::new(":memory:").unwrap();
        assert!(execute_query(&connector, "SELEC 1").await.is_err());
    }
}
