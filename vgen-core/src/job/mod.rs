pub mod error;
pub mod executor;
pub mod models;
pub mod store;
pub mod webhook;

pub use error::{JobError, JobResult};
pub use executor::{Executor, ExecutorConfig, RecoveryReport};
pub use models::{
    Job, JobDelivery, JobFilter, JobStatus, JobSummary, VariantOutcome, VariantResult,
};
pub use store::{SqliteJobStore, SqliteJobStoreBuilder, StoreAccess};
pub use webhook::{
    sign_payload, HttpWebhookNotifier, WebhookError, WebhookNotifier, WebhookPayload,
    SIGNATURE_HEADER,
};
