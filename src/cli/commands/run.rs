//! Run Command
//!
//! Execute a job file through the cascade and seal its records.
//!
//! Usage:
//!   regencascade run job.yaml [--output doc.json] [--report] [--no-store]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::ai::client::{OpenAiClient, SharedClient};
use crate::cascade::{JobRunner, JobSubmission};
use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, write_output};
use crate::types::{JobReport, JobStatus, Result, Verdict};

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub job: PathBuf,
    /// Where to write the assembled document (or the full report)
    pub output: Option<PathBuf>,
    /// Write the full report instead of the assembled document
    pub full_report: bool,
    /// Skip persisting sealed records
    pub no_store: bool,
    /// Print the report as JSON on stdout
    pub json: bool,
    pub quiet: bool,
}

/// Run a job end to end; the returned status drives the exit code
pub async fn run(ctx: &CommandContext, options: RunOptions) -> Result<JobStatus> {
    let out = Output::quiet(options.quiet || options.json);
    let submission = JobSubmission::from_path(&options.job)?;
    out.header(&format!(
        "Job {} ({} units)",
        submission.job_id,
        submission.units.len()
    ));

    let client: SharedClient = Arc::new(OpenAiClient::new(
        &ctx.config.llm,
        ctx.config.tiers.clone(),
    )?);
    let runner = JobRunner::new(client, ctx.config.clone())
        .with_sink(Arc::new(ConsoleRenderer::new(options.quiet || options.json)));

    let cancel = runner.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping units at their next transition");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = runner.run(submission).await;
    interrupt.abort();
    let report = report?;

    if !options.no_store {
        let db = ctx.open_db()?;
        db.save_report(&report)?;
        out.info(&format!("Records sealed in {}", ctx.db_path.display()));
    }

    if let Some(path) = &options.output {
        let document = if options.full_report {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string_pretty(&report.assemble())?
        };
        write_output(path, &document)?;
        out.success(&format!("Wrote {}", path.display()));
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&out, &report);
    }

    Ok(report.status)
}

fn print_summary(out: &Output, report: &JobReport) {
    out.section("Summary");
    out.field("Status", report.status);
    out.field("Accepted", report.count(Verdict::Accepted));
    out.field("Degraded", report.count(Verdict::AcceptedDegraded));
    out.field("Failed", report.count(Verdict::Failed));
    out.field("Model calls", report.metrics.model_calls);
    out.field("Tokens", report.budget.consumed);
    out.field("Cost", format!("${:.4}", report.metrics.total_cost_usd));
    if report.cancelled {
        out.warning("Job was cancelled before every unit finished");
    }

    for record in report.records.iter().filter(|r| r.verdict != Verdict::Accepted) {
        let reason = record
            .final_failure
            .map(|k| k.to_string())
            .or_else(|| record.degradation_notes.last().cloned())
            .unwrap_or_default();
        out.warning(&format!(
            "{} ({}): {} {}",
            record.unit_id, record.criticality, record.verdict, reason
        ));
    }

    match report.status {
        JobStatus::Succeeded => out.success("All units accepted"),
        JobStatus::SucceededWithDegradations => {
            out.warning("Completed with degraded or missing non-critical units")
        }
        JobStatus::Failed => out.error("A critical unit failed"),
    }
}
