// layerline-core/src/ports/connector.rs
//
// The relational store as the pipeline sees it: DDL, parameterised DML run
// inside one transaction, and text-valued reads. Adapters decide how.

use crate::domain::job::TableRef;
use crate::domain::value::Value;
use crate::error::EtlError;
use async_trait::async_trait;

/// A column as the store reports it.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// One SQL text with zero or more parameter sets. With no parameter set the
/// SQL runs once as-is; otherwise it is prepared once and run per set.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Vec<Value>>,
}

impl Statement {
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bound(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params: vec![params],
        }
    }

    pub fn batch(sql: impl Into<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            sql: sql.into(),
            params: rows,
        }
    }
}

/// Rows rendered as text; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn execute(&self, query: &str) -> Result<(), EtlError>;

    /// Runs every statement in one transaction and returns the number of
    /// rows they changed. Nothing is kept if one fails.
    async fn execute_transaction(&self, statements: &[Statement]) -> Result<u64, EtlError>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, EtlError>;

    /// Empty when the table does not exist.
    async fn fetch_columns(&self, table: &TableRef) -> Result<Vec<ColumnSchema>, EtlError>;

    /// Columns of the table's primary key, empty when it has none.
    async fn fetch_primary_key(&self, table: &TableRef) -> Result<Vec<String>, EtlError>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, EtlError> {
        Ok(!self.fetch_columns(table).await?.is_empty())
    }

    fn engine_name(&self) -> &str;
}
