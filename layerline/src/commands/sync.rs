// layerline/src/commands/sync.rs
//
// USE CASE: Write the project's job definitions to the catalog.

use std::path::PathBuf;

use layerline_core::application::sync_project;

use super::Project;

pub async fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    let project = Project::open(&project_dir)?;
    let report = sync_project(project.catalog.as_ref(), &project.dir, &project.config).await?;
    for job in &report.jobs {
        println!("   synced {}", job);
    }
    println!("Synced {} job(s) into the catalog", report.jobs.len());
    Ok(())
}
