// layerline/src/commands/inspect.rs
//
// USE CASE: Inspect a table (schema + sample rows).

use std::path::PathBuf;

use layerline_core::application::inspect_table;
use layerline_core::domain::job::TableRef;

use super::{Project, render, table};

pub async fn execute(project_dir: PathBuf, table_name: String, limit: usize) -> anyhow::Result<()> {
    let project = Project::open(&project_dir)?;
    let target = TableRef::parse(&table_name, "main");

    let inspection = inspect_table(project.connector.as_ref(), &target, limit).await?;

    println!("\nInspecting table: {}", inspection.table);
    println!("   Rows: {}", inspection.row_count);
    if !inspection.primary_key.is_empty() {
        println!("   Primary key: ({})", inspection.primary_key.join(", "));
    }

    let mut columns = table(vec!["Column", "Type", "Nullable"]);
    for (name, data_type, nullable) in &inspection.columns {
        columns.add_row(vec![
            name.clone(),
            data_type.clone(),
            if *nullable { "yes" } else { "no" }.to_string(),
        ]);
    }
    println!("{columns}");

    println!("   --- Rows (Limit {}) ---", limit);
    println!("{}", render(&inspection.sample));
    Ok(())
}
