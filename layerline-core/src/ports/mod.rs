pub mod audit_sink;
pub mod catalog;
pub mod connector;
pub mod source;
