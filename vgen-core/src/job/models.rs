use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{Plan, PlanRequest, SlotKey, VariantTarget};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Edges of the job state machine. `queued -> failed` covers a job that
    /// could not be claimed at all.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Result of one gateway call. Failures are data, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VariantOutcome {
    Generated { content: String },
    Failed { reason: String },
}

impl VariantOutcome {
    pub fn generated(content: impl Into<String>) -> Self {
        VariantOutcome::Generated {
            content: content.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        VariantOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, VariantOutcome::Generated { .. })
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            VariantOutcome::Generated { .. } => "generated",
            VariantOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantResult {
    pub target: VariantTarget,
    pub slot_index: usize,
    #[serde(flatten)]
    pub outcome: VariantOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl VariantResult {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.target.clone(), self.slot_index)
    }
}

/// What a terminal notification carries about a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDelivery {
    pub job_id: String,
    pub status: JobStatus,
    pub webhook_url: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub results: Vec<VariantResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub request: PlanRequest,
    pub plan: Plan,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered by plan position.
    pub results: Vec<VariantResult>,
}

impl Job {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn result_for(&self, key: &SlotKey) -> Option<&VariantResult> {
        self.results
            .iter()
            .find(|result| result.slot_index == key.slot_index && result.target == key.target)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            plan_id: self.plan.plan_id.clone(),
            variant_count: self.plan.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub plan_id: String,
    pub variant_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Every job in `status`, without a limit.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }
}
