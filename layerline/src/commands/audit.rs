// layerline/src/commands/audit.rs
//
// USE CASE: Show recent audit records of a job.

use std::path::PathBuf;

use super::{Project, table};

pub async fn execute(project_dir: PathBuf, job: String, limit: usize) -> anyhow::Result<()> {
    let project = Project::open(&project_dir)?;
    project.catalog.initialize().await?;

    let records = project.catalog.audit_history(&job, limit).await?;
    if records.is_empty() {
        println!("No audit records for {}", job);
        return Ok(());
    }

    let mut out = table(vec![
        "Id", "Stage", "Status", "Start", "End", "Rows", "Rejects", "Message",
    ]);
    for record in records {
        out.add_row(vec![
            record.id.to_string(),
            record.stage.to_string(),
            record.status.to_string(),
            record.start_time.to_rfc3339(),
            record
                .end_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            record.row_count.to_string(),
            record.reject_count.to_string(),
            record.message.unwrap_or_default(),
        ]);
    }
    println!("{out}");
    Ok(())
}
