//! Regeneration record persistence.
//!
//! Records are written once per job and never updated: a second write for
//! the same job and unit fails with [`CascadeError::RecordSealed`]. Each
//! accepted object is stored with a SHA-256 digest for audit.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::database::Database;
use crate::types::{
    Attempt, CascadeError, Criticality, FailureKind, JobId, JobReport, JobStatus, ModelTier,
    Outcome, RegenerationRecord, Result, ResultExt, StrategyUsed, UnitId, Verdict,
};

/// One row of the job listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredJob {
    pub job_id: JobId,
    pub status: String,
    pub cancelled: bool,
    pub units: usize,
    pub failed: usize,
    pub total_tokens: u64,
    pub created_at: String,
}

/// Canonical SHA-256 of a final object
pub fn object_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sealed_or(err: rusqlite::Error, unit_id: &UnitId) -> CascadeError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            CascadeError::RecordSealed {
                unit_id: unit_id.to_string(),
            }
        }
        _ => CascadeError::Database(err),
    }
}

fn parse_column<T, E: std::fmt::Display>(
    index: usize,
    parsed: std::result::Result<T, E>,
) -> rusqlite::Result<T> {
    parsed.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

impl Database {
    /// Persist a finished job and all of its records atomically
    pub fn save_report(&self, report: &JobReport) -> Result<()> {
        let budget_json = serde_json::to_string(&report.budget)?;
        let metrics_json = serde_json::to_string(&report.metrics)?;
        let status = serde_json::to_value(report.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();

        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, status, cancelled, budget_json, metrics_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    report.job_id.as_str(),
                    status,
                    report.cancelled,
                    budget_json,
                    metrics_json,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
                    CascadeError::Storage(format!("job {} is already stored", report.job_id))
                }
                other => CascadeError::Database(other),
            })?;

            for (position, record) in report.records.iter().enumerate() {
                insert_record(conn, &report.job_id, position, record)?;
            }
            Ok(())
        })?;

        info!(
            job = %report.job_id,
            records = report.records.len(),
            "Stored job report"
        );
        Ok(())
    }

    /// Records of one job in submission order
    pub fn load_records(&self, job_id: &JobId) -> Result<Vec<RegenerationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT unit_id, criticality, verdict, final_failure, final_object,
                        best_semantic_score, total_tokens, total_cost_usd, degradation_notes
                 FROM regeneration_records WHERE job_id = ?1 ORDER BY position",
            )
            .with_context("Failed to prepare record query")?;

        let rows = stmt
            .query_map(params![job_id.as_str()], |row| {
                let criticality: String = row.get(1)?;
                let verdict: String = row.get(2)?;
                let final_failure: Option<String> = row.get(3)?;
                let final_object: Option<String> = row.get(4)?;
                let notes: String = row.get(8)?;
                Ok(RegenerationRecord {
                    unit_id: UnitId::new(row.get::<_, String>(0)?),
                    criticality: if criticality == "critical" {
                        Criticality::Critical
                    } else {
                        Criticality::Standard
                    },
                    final_object: final_object
                        .map(|s| parse_column(4, serde_json::from_str(&s)))
                        .transpose()?,
                    attempts: Vec::new(),
                    total_tokens: row.get::<_, i64>(6)? as u64,
                    total_cost_usd: row.get(7)?,
                    verdict: parse_column(2, verdict.parse::<Verdict>())?,
                    final_failure: final_failure
                        .map(|s| parse_column(3, s.parse::<FailureKind>()))
                        .transpose()?,
                    best_semantic_score: row.get(5)?,
                    degradation_notes: parse_column(8, serde_json::from_str(&notes))?,
                })
            })
            .with_context("Failed to query records")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.with_context("Failed to read record row")?);
        }
        drop(stmt);

        for record in &mut records {
            record.attempts = load_attempts(&conn, job_id, &record.unit_id)?;
        }
        debug!(job = %job_id, records = records.len(), "Loaded records");
        Ok(records)
    }

    /// Stored jobs, newest first
    pub fn list_jobs(&self) -> Result<Vec<StoredJob>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT j.id, j.status, j.cancelled, j.created_at,
                        COUNT(r.unit_id),
                        COALESCE(SUM(CASE WHEN r.verdict = 'Failed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(r.total_tokens), 0)
                 FROM jobs j LEFT JOIN regeneration_records r ON r.job_id = j.id
                 GROUP BY j.id ORDER BY j.created_at DESC",
            )
            .with_context("Failed to prepare job listing")?;

        let jobs = stmt
            .query_map([], |row| {
                Ok(StoredJob {
                    job_id: JobId::new(row.get::<_, String>(0)?),
                    status: row.get(1)?,
                    cancelled: row.get(2)?,
                    created_at: row.get(3)?,
                    units: row.get::<_, i64>(4)? as usize,
                    failed: row.get::<_, i64>(5)? as usize,
                    total_tokens: row.get::<_, i64>(6)? as u64,
                })
            })
            .with_context("Failed to list jobs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context("Failed to read job row")?;
        Ok(jobs)
    }

    /// Status of a stored job, if present
    pub fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>> {
        let status: Option<String> = self
            .conn()?
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to query job status")?;
        status
            .map(|s| serde_json::from_value(Value::String(s)).map_err(CascadeError::from))
            .transpose()
    }

    /// Digest stored for a unit's final object
    pub fn object_digest(&self, job_id: &JobId, unit_id: &UnitId) -> Result<Option<String>> {
        let digest: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT object_digest FROM regeneration_records WHERE job_id = ?1 AND unit_id = ?2",
                params![job_id.as_str(), unit_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to query digest")?;
        Ok(digest.flatten())
    }
}

fn insert_record(
    conn: &Connection,
    job_id: &JobId,
    position: usize,
    record: &RegenerationRecord,
) -> Result<()> {
    let final_object = record.final_object.as_ref().map(Value::to_string);
    let digest = record.final_object.as_ref().map(object_digest);

    conn.execute(
        "INSERT INTO regeneration_records
         (job_id, unit_id, position, criticality, verdict, final_failure, final_object,
          object_digest, best_semantic_score, total_tokens, total_cost_usd,
          degradation_notes, sealed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            job_id.as_str(),
            record.unit_id.as_str(),
            position as i64,
            record.criticality.to_string(),
            record.verdict.as_str(),
            record.final_failure.map(|k| k.as_str()),
            final_object,
            digest,
            record.best_semantic_score,
            record.total_tokens as i64,
            record.total_cost_usd,
            serde_json::to_string(&record.degradation_notes)?,
            chrono::Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| sealed_or(e, &record.unit_id))?;

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO attempts
             (job_id, unit_id, attempt_index, strategy_used, model_tier, raw_output,
              tokens_consumed, cost_usd, latency_ms, outcome, semantic_score, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .with_context("Failed to prepare attempt insert")?;
    for attempt in &record.attempts {
        stmt.execute(params![
            job_id.as_str(),
            record.unit_id.as_str(),
            attempt.attempt_index,
            attempt.strategy_used.to_string(),
            attempt.model_tier.map(|t| t.as_str()),
            attempt.raw_output,
            attempt.tokens_consumed as i64,
            attempt.cost_usd,
            attempt.latency_ms as i64,
            attempt.outcome.to_string(),
            attempt.semantic_score,
            attempt.note,
        ])
        .map_err(|e| sealed_or(e, &record.unit_id))?;
    }
    Ok(())
}

fn load_attempts(conn: &Connection, job_id: &JobId, unit_id: &UnitId) -> Result<Vec<Attempt>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT attempt_index, strategy_used, model_tier, raw_output, tokens_consumed,
                    cost_usd, latency_ms, outcome, semantic_score, note
             FROM attempts WHERE job_id = ?1 AND unit_id = ?2 ORDER BY attempt_index",
        )
        .with_context("Failed to prepare attempt query")?;

    let attempts = stmt
        .query_map(params![job_id.as_str(), unit_id.as_str()], |row| {
            let strategy: String = row.get(1)?;
            let tier: Option<String> = row.get(2)?;
            let outcome: String = row.get(7)?;
            Ok(Attempt {
                attempt_index: row.get(0)?,
                strategy_used: parse_column(1, StrategyUsed::try_from(strategy))?,
                model_tier: tier
                    .map(|t| parse_column(2, t.parse::<ModelTier>()))
                    .transpose()?,
                raw_output: row.get(3)?,
                tokens_consumed: row.get::<_, i64>(4)? as u64,
                cost_usd: row.get(5)?,
                latency_ms: row.get::<_, i64>(6)? as u64,
                outcome: parse_column(7, Outcome::try_from(outcome))?,
                semantic_score: row.get(8)?,
                note: row.get(9)?,
            })
        })
        .with_context("Failed to query attempts")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context("Failed to read attempt row")?;
    Ok(attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::budget::BudgetStats;
    use crate::ai::metrics::MetricsSummary;
    use crate::types::{AttemptLog, RepairStrategy, Seal};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, verdict: Verdict) -> RegenerationRecord {
        let mut log = AttemptLog::new(UnitId::new(id), Criticality::Standard);
        log.push(Attempt {
            attempt_index: 0,
            strategy_used: StrategyUsed::Generation,
            model_tier: None,
            raw_output: "{category: x".into(),
            tokens_consumed: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            outcome: Outcome::Failure(FailureKind::ParseError),
            semantic_score: None,
            note: Some("output is not valid JSON".into()),
        });
        log.push(Attempt {
            attempt_index: 1,
            strategy_used: StrategyUsed::Repair(RepairStrategy::LlmAssistedRepair),
            model_tier: Some(ModelTier::Tier1),
            raw_output: r#"{"category": "x"}"#.into(),
            tokens_consumed: 120,
            cost_usd: 0.0002,
            latency_ms: 35,
            outcome: Outcome::Success,
            semantic_score: Some(0.9),
            note: None,
        });
        let accepted = verdict != Verdict::Failed;
        log.seal(Seal {
            verdict,
            final_object: accepted.then(|| json!({"category": "x"})),
            final_failure: (!accepted).then_some(FailureKind::SemanticQualityFailure),
            best_semantic_score: Some(0.9),
            notes: vec!["note".into()],
        })
    }

    fn report(job: &str, records: Vec<RegenerationRecord>) -> JobReport {
        JobReport {
            job_id: JobId::new(job),
            status: JobStatus::from_records(&records),
            records,
            budget: BudgetStats::default(),
            metrics: MetricsSummary::default(),
            cancelled: false,
        }
    }

    fn db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("records.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, db) = db();
        let original = report(
            "job-1",
            vec![record("b", Verdict::Accepted), record("a", Verdict::Failed)],
        );
        db.save_report(&original).unwrap();

        let loaded = db.load_records(&JobId::new("job-1")).unwrap();
        assert_eq!(loaded, original.records);
        assert_eq!(
            db.job_status(&JobId::new("job-1")).unwrap(),
            Some(JobStatus::SucceededWithDegradations)
        );
        assert_eq!(db.job_status(&JobId::new("missing")).unwrap(), None);
    }

    #[test]
    fn test_records_are_write_once() {
        let (_dir, db) = db();
        let original = report("job-1", vec![record("a", Verdict::Accepted)]);
        db.save_report(&original).unwrap();
        assert!(db.save_report(&original).is_err());

        // The failed second write left the first intact
        assert_eq!(db.load_records(&JobId::new("job-1")).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_unit_in_one_job_rejected() {
        let (_dir, db) = db();
        let dup = report(
            "job-2",
            vec![record("a", Verdict::Accepted), record("a", Verdict::Accepted)],
        );
        assert!(matches!(
            db.save_report(&dup),
            Err(CascadeError::RecordSealed { .. })
        ));
        assert!(db.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_digest_and_listing() {
        let (_dir, db) = db();
        db.save_report(&report(
            "job-3",
            vec![record("a", Verdict::Accepted), record("b", Verdict::Failed)],
        ))
        .unwrap();

        let digest = db
            .object_digest(&JobId::new("job-3"), &UnitId::new("a"))
            .unwrap();
        assert_eq!(digest, Some(object_digest(&json!({"category": "x"}))));
        assert_eq!(
            db.object_digest(&JobId::new("job-3"), &UnitId::new("b")).unwrap(),
            None
        );

        let jobs = db.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].units, 2);
        assert_eq!(jobs[0].failed, 1);
        assert_eq!(jobs[0].total_tokens, 240);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = object_digest(&json!({"title": "x", "pages": 2}));
        let b = object_digest(&json!({"title": "x", "pages": 2}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
