pub mod audit_sink;
pub mod catalog;
pub mod duckdb;
pub mod source;
