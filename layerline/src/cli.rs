// layerline/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "layerline")]
#[command(about = "Metadata-driven Raw -> Curated -> Processed loader", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "LAYERLINE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Syncs job definitions, then runs jobs through Raw, Curated and Processed
    Run {
        /// Project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        /// Job to run; repeat for several. Every catalogued job when omitted.
        #[arg(long, short)]
        job: Vec<String>,

        /// Jobs run at once (defaults to the project setting)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Writes the project's job definitions to the catalog
    Sync {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Checks configuration and job files without touching the database
    Validate {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Shows recent audit records of a job
    Audit {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        #[arg(long, short)]
        job: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Shows the load watermarks of a job
    Watermarks {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        #[arg(long, short)]
        job: String,
    },

    /// Executes a raw SQL query (ad-hoc)
    Query {
        query: String,

        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Inspects a table (schema + sample rows)
    Inspect {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,

        /// Table to inspect, `schema.table`
        #[arg(long, short)]
        table: String,

        /// Number of sample rows to display
        #[arg(long, default_value = "5")]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use clap::Parser;

    #[test]
    fn test_cli_parse_run_defaults() -> Result<()> {
        let args = Cli::parse_from(["layerline", "run"]);
        assert_eq!(args.log_format, LogFormat::Text);
        match args.command {
            Commands::Run {
                project_dir,
                job,
                concurrency,
            } => {
                assert_eq!(project_dir.to_string_lossy(), ".");
                assert!(job.is_empty());
                assert_eq!(concurrency, None);
                Ok(())
            }
            _ => bail!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_many_jobs() -> Result<()> {
        let args = Cli::parse_from([
            "layerline",
            "run",
            "--job",
            "JOB_DEPT",
            "-j",
            "JOB_EMP",
            "--concurrency",
            "2",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.log_format, LogFormat::Json);
        match args.command {
            Commands::Run {
                job, concurrency, ..
            } => {
                assert_eq!(job, vec!["JOB_DEPT", "JOB_EMP"]);
                assert_eq!(concurrency, Some(2));
                Ok(())
            }
            _ => bail!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_inspect() -> Result<()> {
        let args = Cli::parse_from([
            "layerline",
            "inspect",
            "--table",
            "processed.employee",
            "--limit",
            "10",
        ]);
        match args.command {
            Commands::Inspect { table, limit, .. } => {
                assert_eq!(table, "processed.employee");
                assert_eq!(limit, 10);
                Ok(())
            }
            _ => bail!("Expected Inspect command"),
        }
    }

    #[test]
    fn test_cli_audit_requires_job() {
        assert!(Cli::try_parse_from(["layerline", "audit"]).is_err());
    }
}
