pub mod config;
pub mod error;
pub mod gateway;
pub mod job;
pub mod pipeline;
pub mod plan;
pub mod sqlite;

pub use config::{load_vgen_config, PlatformProfile, VgenConfig};
pub use error::{ConfigError, Result};
pub use gateway::{
    GatewayError, GeneratedContent, GenerationGateway, GenerationRequest, HttpGenerationGateway,
};
pub use job::{
    Executor, ExecutorConfig, HttpWebhookNotifier, Job, JobError, JobFilter, JobResult, JobStatus,
    JobSummary, RecoveryReport, SqliteJobStore, SqliteJobStoreBuilder, StoreAccess,
    VariantOutcome, VariantResult, WebhookError, WebhookNotifier, WebhookPayload,
};
pub use pipeline::{
    check_length_request, BucketVariants, JobSubmission, LengthVariant, LengthVariantResponse,
    PipelineError, PipelineResult, SubmissionOutcome, VariantPipeline,
    MAX_BUCKET_CHARS, MAX_REQUESTED_VARIANTS,
};
pub use plan::{
    LengthBucket, LengthBucketPlanner, LengthVariantRequest, Plan, PlanRequest, Planner,
    ValidationIssue, ValidationResult, Validator, VariantSpec, VariantTarget,
};
