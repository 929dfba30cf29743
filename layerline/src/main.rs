// layerline/src/main.rs

mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG=debug layerline run ... to see the details
    logging::init(cli.log_format)?;

    match cli.command {
        Commands::Run {
            project_dir,
            job,
            concurrency,
        } => commands::run::execute(project_dir, job, concurrency).await?,
        Commands::Sync { project_dir } => commands::sync::execute(project_dir).await?,
        Commands::Validate { project_dir } => commands::validate::execute(project_dir)?,
        Commands::Audit {
            project_dir,
            job,
            limit,
        } => commands::audit::execute(project_dir, job, limit).await?,
        Commands::Watermarks { project_dir, job } => {
            commands::watermarks::execute(project_dir, job).await?
        }
        Commands::Query { query, project_dir } => {
            commands::query::execute(project_dir, query).await?
        }
        Commands::Inspect {
            project_dir,
            table,
            limit,
        } => commands::inspect::execute(project_dir, table, limit).await?,
    }

    Ok(())
}
