// layerline-core/src/application/mod.rs

pub mod engine;
pub mod materialization;
pub mod orchestrator;
pub mod recorder;
pub mod sync;
pub mod table_io;
pub mod transform;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Lets the CLI write `use layerline_core::application::{Orchestrator, sync_project};`
// without knowing the file layout.

pub use engine::{TableInspection, execute_query, inspect_table};
pub use materialization::{MaterializeReport, SchemaMaterializer};
pub use orchestrator::{Orchestrator, RunReport, StageReport};
pub use recorder::AuditRecorder;
pub use sync::{SyncReport, sync_catalog, sync_project};
pub use transform::{CuratedToProcessed, RawToCurated, SourceToRaw, StageContext, TransformEngine};
