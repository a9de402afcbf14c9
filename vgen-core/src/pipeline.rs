//! Request boundary: plan, validate, then either answer a dry run or
//! persist the job and hand it to a detached executor.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

use crate::config::VgenConfig;
use crate::gateway::{generate_outcome, GenerationGateway};
use crate::job::{
    Executor, ExecutorConfig, Job, JobError, JobFilter, JobStatus, JobSummary, RecoveryReport,
    SqliteJobStore, VariantOutcome, WebhookNotifier,
};
use crate::plan::{
    BrandIdentity, LengthBucket, LengthBucketPlanner, LengthVariantRequest, Plan, PlanRequest,
    Planner, SourceAsset, ValidationResult, Validator, VariantTarget,
};

/// Upper bound on requested counts, checked before planning so a malformed
/// request cannot make the planner allocate without limit.
pub const MAX_REQUESTED_VARIANTS: usize = 10_000;

/// Upper bound on a length-bucket character budget.
pub const MAX_BUCKET_CHARS: usize = 100_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {field} {reason}")]
    Input { field: &'static str, reason: String },
    #[error("plan rejected: {}", .0.messages().join("; "))]
    Rejected(ValidationResult),
    #[error("job store error: {0}")]
    Job(#[from] JobError),
    #[error("no async runtime available to execute the job")]
    NoRuntime,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

fn input_error(field: &'static str, reason: impl Into<String>) -> PipelineError {
    PipelineError::Input {
        field,
        reason: reason.into(),
    }
}

/// Wire shape of a job creation request. Required fields are optional here
/// so their absence is reported as an input error rather than a parse error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobSubmission {
    #[serde(default)]
    pub brand: Option<BrandIdentity>,
    #[serde(default)]
    pub source_asset: Option<SourceAsset>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub variants_per_platform: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub feature_flags: BTreeSet<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl JobSubmission {
    pub fn into_plan_request(self) -> PipelineResult<(PlanRequest, bool, Option<String>)> {
        let brand = self
            .brand
            .filter(|brand| !brand.name.trim().is_empty())
            .ok_or_else(|| input_error("brand", "is required"))?;
        let source_asset = self
            .source_asset
            .filter(|asset| !asset.reference.trim().is_empty())
            .ok_or_else(|| input_error("source_asset", "is required"))?;

        let platforms = match self.platforms {
            Some(platforms) => {
                let mut normalized = Vec::with_capacity(platforms.len());
                for platform in platforms {
                    let platform = platform.trim().to_lowercase();
                    if platform.is_empty() {
                        return Err(input_error("platforms", "contains a blank name"));
                    }
                    normalized.push(platform);
                }
                Some(normalized)
            }
            None => None,
        };
        if let Some(count) = self.variants_per_platform {
            if count > MAX_REQUESTED_VARIANTS {
                return Err(input_error(
                    "variants_per_platform",
                    format!("must not exceed {MAX_REQUESTED_VARIANTS}"),
                ));
            }
        }
        let webhook_url = match self.webhook_url {
            Some(raw) => Some(parse_webhook_url(&raw)?),
            None => None,
        };

        let request = PlanRequest {
            brand,
            source_asset,
            platforms,
            variants_per_platform: self.variants_per_platform,
            seed: self.seed,
            feature_flags: self.feature_flags,
        };
        Ok((request, self.dry_run, webhook_url))
    }
}

/// Input checks for a length-bucket request, shared by every entry point
/// that plans one.
pub fn check_length_request(request: &LengthVariantRequest) -> PipelineResult<()> {
    if request.content.trim().is_empty() {
        return Err(input_error("content", "is required"));
    }
    match request.max_chars {
        Some(0) => return Err(input_error("max_chars", "must be at least 1")),
        Some(chars) if chars > MAX_BUCKET_CHARS => {
            return Err(input_error(
                "max_chars",
                format!("must not exceed {MAX_BUCKET_CHARS}"),
            ))
        }
        _ => {}
    }
    if request.total_variants.unwrap_or(0) > MAX_REQUESTED_VARIANTS {
        return Err(input_error(
            "total_variants",
            format!("must not exceed {MAX_REQUESTED_VARIANTS}"),
        ));
    }
    Ok(())
}

fn parse_webhook_url(raw: &str) -> PipelineResult<String> {
    let url = url::Url::parse(raw.trim())
        .map_err(|err| input_error("webhook_url", format!("is not a valid URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(input_error(
            "webhook_url",
            format!("uses unsupported scheme {other}"),
        )),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    DryRun {
        plan: Plan,
        validation: ValidationResult,
    },
    Queued {
        job_id: String,
        status: JobStatus,
        created_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LengthVariant {
    pub slot_index: usize,
    #[serde(flatten)]
    pub outcome: VariantOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketVariants {
    pub bucket: LengthBucket,
    pub max_length: usize,
    pub variants: Vec<LengthVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LengthVariantResponse {
    pub plan_id: String,
    pub seed: u64,
    pub generated_at: DateTime<Utc>,
    pub buckets: Vec<BucketVariants>,
}

pub struct VariantPipeline {
    config: Arc<VgenConfig>,
    planner: Planner,
    bucket_planner: LengthBucketPlanner,
    validator: Validator,
    store: SqliteJobStore,
    gateway: Arc<dyn GenerationGateway>,
    executor: Arc<Executor>,
}

impl VariantPipeline {
    pub fn new(
        config: Arc<VgenConfig>,
        store: SqliteJobStore,
        gateway: Arc<dyn GenerationGateway>,
        notifier: Arc<dyn WebhookNotifier>,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::clone(&gateway),
            notifier,
            ExecutorConfig::from_config(&config),
        ));
        Self {
            planner: Planner::new(Arc::clone(&config)),
            bucket_planner: LengthBucketPlanner::new(Arc::clone(&config)),
            validator: Validator::new(Arc::clone(&config)),
            config,
            store,
            gateway,
            executor,
        }
    }

    pub fn config(&self) -> &VgenConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteJobStore {
        &self.store
    }

    /// Plans and validates synchronously; a non-dry-run submission returns
    /// as soon as the job is durable in `queued`.
    pub fn submit(&self, submission: JobSubmission) -> PipelineResult<SubmissionOutcome> {
        let (request, dry_run, webhook_url) = submission.into_plan_request()?;
        let plan = self.planner.plan(&request);
        let validation = self.validator.validate(&plan);

        if dry_run {
            info!(
                target: "pipeline",
                plan_id = %plan.plan_id,
                variants = plan.len(),
                valid = validation.valid,
                "dry run planned"
            );
            return Ok(SubmissionOutcome::DryRun { plan, validation });
        }
        if !validation.valid {
            info!(target: "pipeline", plan_id = %plan.plan_id, issues = validation.issues.len(), "plan rejected");
            return Err(PipelineError::Rejected(validation));
        }

        Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let job = self
            .store
            .persist_new_job(&plan, &request, webhook_url.as_deref())?;
        info!(
            target: "pipeline",
            job_id = %job.job_id,
            plan_id = %plan.plan_id,
            variants = plan.len(),
            cost = plan.cost.total,
            "job queued"
        );
        self.executor.spawn(job.job_id.clone());
        Ok(SubmissionOutcome::Queued {
            job_id: job.job_id,
            status: job.status,
            created_at: job.created_at,
        })
    }

    /// Fails jobs a previous process left `running` and re-spawns the
    /// `queued` ones. Call once at startup, before accepting submissions.
    pub async fn recover(&self) -> PipelineResult<RecoveryReport> {
        Ok(self.executor.recover().await?)
    }

    pub fn job(&self, job_id: &str) -> PipelineResult<Option<Job>> {
        Ok(self.store.load_job(job_id)?)
    }

    pub fn jobs(&self, filter: &JobFilter) -> PipelineResult<Vec<JobSummary>> {
        Ok(self.store.list_jobs(filter)?)
    }

    pub fn plan_length_variants(&self, request: &LengthVariantRequest) -> PipelineResult<Plan> {
        check_length_request(request)?;
        let plan = self.bucket_planner.plan(request);
        let validation = self.validator.validate(&plan);
        if !validation.valid {
            return Err(PipelineError::Rejected(validation));
        }
        Ok(plan)
    }

    /// Generates length-bucket variants inline, one gateway call per slot in
    /// plan order. No job is persisted.
    pub async fn generate_length_variants(
        &self,
        request: LengthVariantRequest,
    ) -> PipelineResult<LengthVariantResponse> {
        let plan = self.plan_length_variants(&request)?;
        let limit = self.config.gateway.timeout();

        let mut buckets: Vec<BucketVariants> = Vec::new();
        for spec in &plan.variants {
            let VariantTarget::Bucket(bucket) = spec.target else {
                continue;
            };
            let outcome = generate_outcome(self.gateway.as_ref(), spec, limit).await;
            let variant = LengthVariant {
                slot_index: spec.slot_index,
                outcome,
            };
            match buckets.last_mut() {
                Some(group) if group.bucket == bucket => group.variants.push(variant),
                _ => buckets.push(BucketVariants {
                    bucket,
                    max_length: spec.constraints.max_length,
                    variants: vec![variant],
                }),
            }
        }

        info!(
            target: "pipeline",
            plan_id = %plan.plan_id,
            variants = plan.len(),
            "length variants generated"
        );
        Ok(LengthVariantResponse {
            plan_id: plan.plan_id,
            seed: plan.seed,
            generated_at: Utc::now(),
            buckets,
        })
    }
}
