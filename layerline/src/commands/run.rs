// layerline/src/commands/run.rs
//
// USE CASE: Sync job definitions, then run jobs through every layer.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use layerline_core::application::{AuditRecorder, Orchestrator, RunReport, sync_project};
use layerline_core::infrastructure::adapters::audit_sink::{JsonlSink, NoopSink, TracingSink};
use layerline_core::infrastructure::adapters::source::DuckDBSourceReader;
use layerline_core::infrastructure::config::AuditSinkKind;
use layerline_core::infrastructure::fs::atomic_write;
use layerline_core::ports::audit_sink::AuditSink;

use super::{Project, table};

pub async fn execute(
    project_dir: PathBuf,
    jobs: Vec<String>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let start = std::time::Instant::now();

    println!("Loading configuration...");
    let project = Project::open(&project_dir)?;
    println!(
        "   Project: {} (v{})",
        project.config.name, project.config.version
    );

    let synced = sync_project(project.catalog.as_ref(), &project.dir, &project.config)
        .await
        .context("Failed to sync job definitions")?;
    println!("   Synced {} job(s)", synced.jobs.len());

    let names = if jobs.is_empty() {
        project.catalog.job_names().await?
    } else {
        jobs
    };

    let target_dir = project.config.target_dir(&project.dir);
    let sink: Arc<dyn AuditSink> = match project.config.audit.sink {
        AuditSinkKind::Tracing => Arc::new(TracingSink),
        AuditSinkKind::Jsonl => Arc::new(JsonlSink::new(
            project.config.audit_log_path(&project.dir),
        )),
        AuditSinkKind::None => Arc::new(NoopSink),
    };
    let recorder = AuditRecorder::new(project.catalog.clone(), sink);
    let source = Arc::new(DuckDBSourceReader::new(
        project.connector.clone(),
        project.dir.clone(),
    ));
    let orchestrator = Arc::new(
        Orchestrator::new(
            project.connector.clone(),
            project.catalog.clone(),
            recorder,
            source,
        )
        .with_schemas(project.config.layer_schemas())
        .with_reject_threshold(project.config.reject_threshold),
    );

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted: stopping before the next stage");
                orchestrator.cancel();
            }
        })
    };
    let workers = concurrency.unwrap_or(project.config.concurrency).max(1);
    let reports = orchestrator.run_many(&names, workers).await;
    interrupt.abort();

    print_reports(&reports);

    let results_path = target_dir.join("run_results.json");
    atomic_write(&results_path, serde_json::to_string_pretty(&reports)?)
        .with_context(|| format!("Failed to write {:?}", results_path))?;

    let failed: Vec<&RunReport> = reports.iter().filter(|r| !r.succeeded()).collect();
    if failed.is_empty() {
        println!(
            "\nSUCCESS! {} job(s) finished in {:.2?}",
            reports.len(),
            start.elapsed()
        );
    } else {
        for report in &failed {
            eprintln!(
                "FAILED {}: {}",
                report.job,
                report.message.as_deref().unwrap_or("unknown error")
            );
        }
        eprintln!("\nFAILURE. {} of {} job(s) failed.", failed.len(), reports.len());
        std::process::exit(1);
    }

    Ok(())
}

fn print_reports(reports: &[RunReport]) {
    let mut out = table(vec!["Job", "Stage", "Status", "Accepted", "Rejected", "Message"]);
    for report in reports {
        if report.stages.is_empty() {
            out.add_row(vec![
                report.job.clone(),
                "-".to_string(),
                report.state.to_string(),
                String::new(),
                String::new(),
                report.message.clone().unwrap_or_default(),
            ]);
        }
        for stage in &report.stages {
            out.add_row(vec![
                report.job.clone(),
                stage.stage.to_string(),
                stage.status.to_string(),
                stage.accepted.to_string(),
                stage.rejected.to_string(),
                stage.message.clone(),
            ]);
        }
    }
    println!("{out}");
}
