// layerline-core/src/lib.rs

#![allow(missing_docs)]
// Memory safety
#![deny(unsafe_code)]
// Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// Performance
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Ports: contracts with the outside world (relational store, sources,
// catalog, audit sink).
pub mod ports;

// 2. Domain: values, mappings, load modes, SCD merge planning, run state.
// Depends on nothing but itself.
pub mod domain;

// 3. Infrastructure: DuckDB, YAML configuration, audit sinks, file discovery.
pub mod infrastructure;

// 4. Application: use cases (materialize, transform, merge, orchestrate).
pub mod application;

pub mod error;

pub use error::EtlError;
