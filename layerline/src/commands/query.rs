// layerline/src/commands/query.rs
//
// USE CASE: Execute a raw SQL query (ad-hoc).

use std::path::PathBuf;

use layerline_core::application::execute_query;

use super::{Project, render};

pub async fn execute(project_dir: PathBuf, query: String) -> anyhow::Result<()> {
    let project = Project::open(&project_dir)?;
    let result = execute_query(project.connector.as_ref(), &query).await?;
    println!("{}", render(&result));
    println!("{} row(s)", result.rows.len());
    Ok(())
}
