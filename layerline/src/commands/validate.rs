// layerline/src/commands/validate.rs
//
// USE CASE: Check configuration and job files. Never opens the database.

use anyhow::Context;
use std::path::PathBuf;

use layerline_core::infrastructure::config::{load_jobs, load_project_config};

use super::table;

pub fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_project_config(&project_dir).with_context(|| {
        format!(
            "Failed to load project configuration from {:?}",
            project_dir
        )
    })?;
    let jobs = load_jobs(&project_dir, &config.job_paths)?;

    let mut out = table(vec!["Job", "Source", "Target", "Load", "SCD", "Columns"]);
    for loaded in &jobs {
        let job = &loaded.definition;
        out.add_row(vec![
            job.name.clone(),
            job.source.describe(),
            format!("{}.{}", job.target_schema, job.target_table),
            job.load_type.as_str().to_string(),
            job.scd_type.as_str().to_string(),
            loaded.mappings.columns().len().to_string(),
        ]);
    }
    println!("{out}");
    println!("{} job(s) valid", jobs.len());
    Ok(())
}
