//! Records Command
//!
//! Inspect sealed regeneration records in the record store.
//!
//! Usage:
//!   regencascade records                    # list stored jobs
//!   regencascade records --job <id>         # per-unit records
//!   regencascade records --job <id> --assemble

use console::style;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::storage::{Database, StoredJob};
use crate::types::{CascadeError, JobId, RegenerationRecord, Result, assemble_records};

/// Options for the records command
#[derive(Debug, Clone, Default)]
pub struct RecordsOptions {
    pub job: Option<String>,
    /// Print the assembled document instead of the records
    pub assemble: bool,
    /// Include every attempt of each record
    pub attempts: bool,
    pub format: String,
}

pub fn run(ctx: &CommandContext, options: &RecordsOptions) -> Result<()> {
    let db = ctx.require_db()?;
    match &options.job {
        None => list(&db, &options.format),
        Some(job) => show(&db, &JobId::new(job.as_str()), options),
    }
}

fn list(db: &Database, format: &str) -> Result<()> {
    let jobs = db.list_jobs()?;
    if format == "json" {
        let rows: Vec<_> = jobs.iter().map(job_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let out = Output::new();
    if jobs.is_empty() {
        out.info("No jobs stored yet");
        return Ok(());
    }
    out.header("Stored Jobs");
    for job in &jobs {
        let cancelled = if job.cancelled { " (cancelled)" } else { "" };
        println!(
            "  {} {}{}  {} units, {} failed, {} tokens  {}",
            style(&job.job_id).cyan(),
            job.status,
            cancelled,
            job.units,
            job.failed,
            job.total_tokens,
            style(&job.created_at).dim()
        );
    }
    Ok(())
}

fn job_json(job: &StoredJob) -> serde_json::Value {
    serde_json::json!({
        "jobId": job.job_id,
        "status": job.status,
        "cancelled": job.cancelled,
        "units": job.units,
        "failed": job.failed,
        "totalTokens": job.total_tokens,
        "createdAt": job.created_at,
    })
}

fn show(db: &Database, job_id: &JobId, options: &RecordsOptions) -> Result<()> {
    let Some(status) = db.job_status(job_id)? else {
        return Err(CascadeError::UnknownJob(job_id.to_string()));
    };
    let mut records = db.load_records(job_id)?;

    if options.assemble {
        println!(
            "{}",
            serde_json::to_string_pretty(&assemble_records(&records))?
        );
        return Ok(());
    }
    if !options.attempts {
        for record in &mut records {
            record.attempts.clear();
        }
    }
    if options.format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let out = Output::new();
    out.header(&format!("Job {} ({})", job_id, status));
    for record in &records {
        print_record(&out, record, options.attempts);
    }
    Ok(())
}

fn print_record(out: &Output, record: &RegenerationRecord, with_attempts: bool) {
    out.section(&format!("{} [{}]", record.unit_id, record.criticality));
    out.field("Verdict", record.verdict);
    if let Some(kind) = record.final_failure {
        out.field("Failure", kind);
    }
    if let Some(score) = record.best_semantic_score {
        out.field("Best score", format!("{:.2}", score));
    }
    out.field("Tokens", record.total_tokens);
    out.field("Cost", format!("${:.4}", record.total_cost_usd));
    for note in &record.degradation_notes {
        out.field("Note", note);
    }
    if with_attempts {
        for attempt in &record.attempts {
            let tier = attempt
                .model_tier
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    #{} {} [{}] {} {}",
                attempt.attempt_index,
                attempt.strategy_used,
                tier,
                attempt.outcome,
                style(format!("{} tok", attempt.tokens_consumed)).dim()
            );
        }
    }
}
