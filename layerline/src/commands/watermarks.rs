// layerline/src/commands/watermarks.rs

use std::path::PathBuf;

use super::{Project, table};

pub async fn execute(project_dir: PathBuf, job: String) -> anyhow::Result<()> {
    let project = Project::open(&project_dir)?;
    project.catalog.initialize().await?;

    let watermarks = project.catalog.watermarks(&job).await?;
    if watermarks.is_empty() {
        println!("No watermarks for {} (next run loads everything)", job);
        return Ok(());
    }

    let mut out = table(vec!["Stage", "Last load"]);
    for mark in watermarks {
        out.add_row(vec![mark.stage.to_string(), mark.last_load_time.to_rfc3339()]);
    }
    println!("{out}");
    Ok(())
}
