// layerline-core/src/application/sync.rs

use std::path::Path;
use tracing::{info, instrument};

use crate::error::EtlError;
use crate::infrastructure::config::{LoadedJob, ProjectConfig, load_jobs};
use crate::ports::catalog::CatalogStore;

/// Jobs written to the catalog by one sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub jobs: Vec<String>,
}

/// Writes validated jobs to the catalog, replacing earlier definitions.
#[instrument(skip_all, fields(jobs = jobs.len()))]
pub async fn sync_catalog(
    catalog: &dyn CatalogStore,
    jobs: &[LoadedJob],
) -> Result<SyncReport, EtlError> {
    catalog.initialize().await?;
    let mut report = SyncReport::default();
    for loaded in jobs {
        catalog.save_job(&loaded.definition, &loaded.mappings).await?;
        info!(
            columns = loaded.mappings.columns().len(),
            "Synced {} from {}",
            loaded.definition.name,
            loaded.origin.display()
        );
        report.jobs.push(loaded.definition.name.clone());
    }
    Ok(report)
}

/// Reads the project's job files and syncs them. Nothing is written when
/// any job is invalid.
pub async fn sync_project(
    catalog: &dyn CatalogStore,
    project_dir: &Path,
    config: &ProjectConfig,
) -> Result<SyncReport, EtlError> {
    let jobs = load_jobs(project_dir, &config.job_paths)?;
    sync_catalog(catalog, &jobs).await
}
