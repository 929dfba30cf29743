pub mod jobs;
pub mod project;

pub use jobs::{ColumnConfig, JobConfig, JobFile, LoadedJob, load_jobs};
pub use project::{AuditSinkConfig, AuditSinkKind, ProjectConfig, load_project_config};
