use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::plan::{Plan, PlanRequest, SlotKey, VariantTarget};
use crate::sqlite::{configure_connection, configure_reader};

use super::models::{
    Job, JobDelivery, JobFilter, JobStatus, JobSummary, VariantOutcome, VariantResult,
};
use super::{JobError, JobResult};

const JOB_SCHEMA: &str = include_str!("../../../sql/jobs.sql");

/// How a store opens its database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreAccess {
    /// Read-write; the file is created on first open.
    #[default]
    Create,
    /// Read-write on a file that must already exist.
    Existing,
    /// Queries only. Writes fail with a database error.
    ReadOnly,
}

impl StoreAccess {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            StoreAccess::Create => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            StoreAccess::Existing => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            StoreAccess::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteJobStoreBuilder {
    path: Option<PathBuf>,
    access: StoreAccess,
}

impl SqliteJobStoreBuilder {
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn access(mut self, access: StoreAccess) -> Self {
        self.access = access;
        self
    }

    pub fn build(self) -> JobResult<SqliteJobStore> {
        let path = self.path.ok_or(JobError::MissingStore)?;
        Ok(SqliteJobStore {
            path,
            access: self.access,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// Durable job records. All status and result writes for one job id go
/// through a per-job lock and an immediate transaction; reads capture the
/// job row and its results inside one transaction.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    access: StoreAccess,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SqliteJobStore {
    pub fn builder() -> SqliteJobStoreBuilder {
        SqliteJobStoreBuilder::default()
    }

    pub fn new(path: impl AsRef<Path>) -> JobResult<Self> {
        Self::builder().path(path).build()
    }

    /// Opens an existing database for queries only.
    pub fn open_read_only(path: impl AsRef<Path>) -> JobResult<Self> {
        Self::builder()
            .path(path)
            .access(StoreAccess::ReadOnly)
            .build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> StoreAccess {
        self.access
    }

    fn open(&self) -> JobResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.access.flags()).map_err(
            |source| JobError::OpenDatabase {
                path: self.path.clone(),
                source,
            },
        )?;
        let configured = match self.access {
            StoreAccess::ReadOnly => configure_reader(&conn),
            StoreAccess::Create | StoreAccess::Existing => configure_connection(&conn),
        };
        configured.map_err(|source| JobError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOB_SCHEMA)?;
        Ok(())
    }

    fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, job_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(job_id);
    }

    /// Persists a new job in `queued` and commits before returning.
    pub fn persist_new_job(
        &self,
        plan: &Plan,
        request: &PlanRequest,
        webhook_url: Option<&str>,
    ) -> JobResult<Job> {
        let now = Utc::now();
        let job = Job {
            job_id: format!("job-{}", Uuid::new_v4().simple()),
            status: JobStatus::Queued,
            request: request.clone(),
            plan: plan.clone(),
            webhook_url: webhook_url.map(str::to_string),
            created_at: now,
            updated_at: now,
            results: Vec::new(),
        };

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO jobs (
                job_id, status, plan_id, request_json, plan_json, webhook_url,
                variant_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &job.job_id,
                job.status.as_str(),
                &job.plan.plan_id,
                serde_json::to_string(&job.request)?,
                serde_json::to_string(&job.plan)?,
                &job.webhook_url,
                job.plan.len() as i64,
                job.created_at,
                job.updated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO job_transitions(job_id, status_from, status_to, note)
             VALUES (?1, NULL, ?2, ?3)",
            params![&job.job_id, job.status.as_str(), "job created"],
        )?;
        tx.commit()?;
        debug!(target: "job_store", job_id = %job.job_id, variants = job.plan.len(), "job persisted");
        Ok(job)
    }

    pub fn load_job(&self, job_id: &str) -> JobResult<Option<Job>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT job_id, status, request_json, plan_json, webhook_url, created_at, updated_at
                 FROM jobs WHERE job_id = ?1",
                [job_id],
                JobRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let results = read_results(&tx, job_id)?;
        tx.commit()?;
        row.into_job(results).map(Some)
    }

    /// Reads status, webhook target and results without decoding the stored
    /// request or plan, so a job whose plan cannot be read still notifies.
    pub fn load_delivery(&self, job_id: &str) -> JobResult<Option<JobDelivery>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT status, webhook_url, updated_at FROM jobs WHERE job_id = ?1",
                [job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, webhook_url, updated_at)) = row else {
            return Ok(None);
        };
        let results = read_results(&tx, job_id)?;
        tx.commit()?;
        Ok(Some(JobDelivery {
            job_id: job_id.to_string(),
            status: parse_status(job_id, &status)?,
            webhook_url,
            updated_at,
            results,
        }))
    }

    pub fn fetch_job(&self, job_id: &str) -> JobResult<Job> {
        self.load_job(job_id)?.ok_or_else(|| JobError::NotFound {
            job_id: job_id.to_string(),
        })
    }

    /// Records the outcome for one planned slot. Only running jobs accept
    /// results; a repeated write for the same slot replaces the previous one.
    pub fn update_job_result(
        &self,
        job_id: &str,
        key: &SlotKey,
        outcome: &VariantOutcome,
    ) -> JobResult<()> {
        let lock = self.job_lock(job_id);
        let _guard = lock_ignoring_poison(&lock);

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (status, plan_json) = tx
            .query_row(
                "SELECT status, plan_json FROM jobs WHERE job_id = ?1",
                [job_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;
        let status = parse_status(job_id, &status)?;
        if status != JobStatus::Running {
            return Err(JobError::NotRunning {
                job_id: job_id.to_string(),
                status,
            });
        }
        let plan: Plan = serde_json::from_str(&plan_json)?;
        let position = plan.position_of(key).ok_or_else(|| JobError::UnknownSlot {
            job_id: job_id.to_string(),
            slot: key.to_string(),
        })?;

        let (content, failure_reason) = match outcome {
            VariantOutcome::Generated { content } => (Some(content.as_str()), None),
            VariantOutcome::Failed { reason } => (None, Some(reason.as_str())),
        };
        let now = Utc::now();
        tx.execute(
            "INSERT INTO job_results (
                job_id, position, target_kind, target_name, slot_index, outcome,
                content, failure_reason, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(job_id, target_kind, target_name, slot_index) DO UPDATE SET
                outcome = excluded.outcome,
                content = excluded.content,
                failure_reason = excluded.failure_reason,
                recorded_at = excluded.recorded_at",
            params![
                job_id,
                position as i64,
                key.target.kind(),
                key.target.name(),
                key.slot_index as i64,
                outcome.label(),
                content,
                failure_reason,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE job_id = ?1",
            params![job_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Moves a job along the state machine. Terminal jobs are immutable.
    pub fn transition_status(&self, job_id: &str, next: JobStatus) -> JobResult<()> {
        self.transition_with_note(job_id, next, None)
    }

    pub fn transition_with_note(
        &self,
        job_id: &str,
        next: JobStatus,
        note: Option<&str>,
    ) -> JobResult<()> {
        let lock = self.job_lock(job_id);
        let guard = lock_ignoring_poison(&lock);

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row("SELECT status FROM jobs WHERE job_id = ?1", [job_id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;
        let current = parse_status(job_id, &current)?;
        if !current.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current,
                to: next,
            });
        }
        tx.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, next.as_str(), Utc::now()],
        )?;
        tx.execute(
            "INSERT INTO job_transitions(job_id, status_from, status_to, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, current.as_str(), next.as_str(), note],
        )?;
        tx.commit()?;
        drop(guard);

        if next.terminal() {
            self.release_lock(job_id);
        }
        debug!(target: "job_store", job_id, from = %current, to = %next, "job transitioned");
        Ok(())
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> JobResult<Vec<JobSummary>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT j.job_id, j.status, j.plan_id, j.variant_count, j.created_at, j.updated_at,
                    COALESCE(SUM(CASE WHEN r.outcome = 'generated' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN r.outcome = 'failed' THEN 1 ELSE 0 END), 0)
             FROM jobs j
             LEFT JOIN job_results r ON r.job_id = j.job_id
             WHERE (?1 IS NULL OR j.status = ?1)
             GROUP BY j.job_id
             ORDER BY j.created_at DESC, j.job_id ASC
             LIMIT ?2",
        )?;
        let limit = filter.limit.map(|limit| limit as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(
                params![filter.status.as_ref().map(JobStatus::as_str), limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                        row.get::<_, DateTime<Utc>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(job_id, status, plan_id, variant_count, created_at, updated_at, ok, failed)| {
                    let status = parse_status(&job_id, &status)?;
                    Ok(JobSummary {
                        job_id,
                        status,
                        plan_id,
                        variant_count: variant_count as usize,
                        succeeded: ok as usize,
                        failed: failed as usize,
                        created_at,
                        updated_at,
                    })
                },
            )
            .collect()
    }

    pub fn count_by_status(&self) -> JobResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }

    pub fn transitions(&self, job_id: &str) -> JobResult<Vec<(Option<String>, String)>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT status_from, status_to FROM job_transitions WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([job_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn read_results(conn: &Connection, job_id: &str) -> JobResult<Vec<VariantResult>> {
    let mut stmt = conn.prepare(
        "SELECT target_kind, target_name, slot_index, outcome, content, failure_reason, recorded_at
         FROM job_results WHERE job_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map([job_id], ResultRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|result| result.into_result(job_id))
        .collect()
}

fn lock_ignoring_poison(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_status(job_id: &str, raw: &str) -> JobResult<JobStatus> {
    raw.parse().map_err(|_| JobError::Corrupt {
        job_id: job_id.to_string(),
        column: "status",
        value: raw.to_string(),
    })
}

struct JobRow {
    job_id: String,
    status: String,
    request_json: String,
    plan_json: String,
    webhook_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get("job_id")?,
            status: row.get("status")?,
            request_json: row.get("request_json")?,
            plan_json: row.get("plan_json")?,
            webhook_url: row.get("webhook_url")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self, results: Vec<VariantResult>) -> JobResult<Job> {
        let status = parse_status(&self.job_id, &self.status)?;
        Ok(Job {
            status,
            request: serde_json::from_str(&self.request_json)?,
            plan: serde_json::from_str(&self.plan_json)?,
            webhook_url: self.webhook_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
            results,
            job_id: self.job_id,
        })
    }
}

struct ResultRow {
    target_kind: String,
    target_name: String,
    slot_index: i64,
    outcome: String,
    content: Option<String>,
    failure_reason: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            target_kind: row.get("target_kind")?,
            target_name: row.get("target_name")?,
            slot_index: row.get("slot_index")?,
            outcome: row.get("outcome")?,
            content: row.get("content")?,
            failure_reason: row.get("failure_reason")?,
            recorded_at: row.get("recorded_at")?,
        })
    }

    fn into_result(self, job_id: &str) -> JobResult<VariantResult> {
        let target = VariantTarget::from_parts(&self.target_kind, &self.target_name).ok_or_else(
            || JobError::Corrupt {
                job_id: job_id.to_string(),
                column: "target_kind",
                value: format!("{}:{}", self.target_kind, self.target_name),
            },
        )?;
        let outcome = match self.outcome.as_str() {
            "generated" => VariantOutcome::Generated {
                content: self.content.unwrap_or_default(),
            },
            "failed" => VariantOutcome::Failed {
                reason: self.failure_reason.unwrap_or_default(),
            },
            other => {
                return Err(JobError::Corrupt {
                    job_id: job_id.to_string(),
                    column: "outcome",
                    value: other.to_string(),
                })
            }
        };
        Ok(VariantResult {
            target,
            slot_index: self.slot_index as usize,
            outcome,
            recorded_at: self.recorded_at,
        })
    }
}
